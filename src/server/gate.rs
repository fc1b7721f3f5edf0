//! On-demand resolution gate.
//!
//! Every read under the fonts path goes through [`Gate::resolve`]. A file
//! already in the user cache or the bundled directory is served as is. A
//! miss that names a catalog entry is fetched while the request waits, then
//! served; its record is queued for persistence without waiting for the write.
//!
//! The gate runs independently of bulk downloads. Both may fetch the same font
//! at the same time; the temp-file/rename protocol makes either result valid.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Path as UrlPath, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::fs;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, info, warn};

use crate::cache::record::CacheRecord;
use crate::cache::writer::WriteSerializer;
use crate::catalog::Catalog;
use crate::server::api::AppState;
use crate::transfer::fetcher::{safe_relative, Fetcher};

/// Where a font read is answered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Present in the user-writable cache.
    Cached(PathBuf),
    /// Present in the read-only bundled directory.
    Bundled(PathBuf),
    /// Fetched from the origin for this request.
    Fetched(PathBuf),
    NotFound,
}

impl Resolution {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Resolution::Cached(p) | Resolution::Bundled(p) | Resolution::Fetched(p) => Some(p),
            Resolution::NotFound => None,
        }
    }
}

pub struct Gate {
    cache_dir: PathBuf,
    bundled_dir: PathBuf,
    catalog: Arc<Catalog>,
    fetcher: Arc<Fetcher>,
    writer: WriteSerializer,
}

impl Gate {
    pub fn new(
        cache_dir: PathBuf,
        bundled_dir: PathBuf,
        catalog: Arc<Catalog>,
        fetcher: Arc<Fetcher>,
        writer: WriteSerializer,
    ) -> Self {
        Self {
            cache_dir,
            bundled_dir,
            catalog,
            fetcher,
            writer,
        }
    }

    /// Decide how to answer a read of `rel`, fetching it if necessary.
    pub async fn resolve(&self, rel: &str) -> Resolution {
        let Some(safe) = safe_relative(rel) else {
            debug!(path = rel, "Rejected font path");
            return Resolution::NotFound;
        };

        let cached = self.cache_dir.join(&safe);
        if is_file(&cached).await {
            return Resolution::Cached(cached);
        }

        let bundled = self.bundled_dir.join(&safe);
        if is_file(&bundled).await {
            return Resolution::Bundled(bundled);
        }

        let Some(descriptor) = self.catalog.lookup_by_url(rel) else {
            debug!(path = rel, "No catalog entry for font path");
            return Resolution::NotFound;
        };

        info!(psn = %descriptor.psn, path = rel, "Fetching font on demand");
        match self.fetcher.fetch(&descriptor).await {
            Ok(path) => {
                self.writer
                    .enqueue(vec![CacheRecord::from(descriptor.as_ref())])
                    .await;
                Resolution::Fetched(path)
            }
            Err(e) => {
                warn!(psn = %descriptor.psn, error = %e, "On-demand font fetch failed");
                Resolution::NotFound
            }
        }
    }
}

pub(crate) async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

/// `GET /<fonts_dir>/{*path}`
pub async fn serve_font(
    State(state): State<Arc<AppState>>,
    UrlPath(path): UrlPath<String>,
    request: Request,
) -> Response {
    let resolution = state.service.resolve(&path).await;
    match resolution.path() {
        Some(file) => match ServeFile::new(file).oneshot(request).await {
            Ok(response) => response.into_response(),
            Err(never) => match never {},
        },
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
