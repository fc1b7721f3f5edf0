//! Font service: wires the catalog, store, fetcher, coordinator and gate
//! together and exposes the operations the host application calls.
//!
//! - `list_assets`: every known font with its cached/default flags
//! - `start_bulk_download`: fire-and-forget batch fetch, progress on `subscribe()`
//! - `cancel_session`: stop the live batch from starting further fetches
//! - `resolve`: on-demand read of a font path
//! - `ensure_defaults`: make sure the default fonts are available locally

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cache::record::CacheRecord;
use crate::cache::store::CacheStore;
use crate::cache::writer::WriteSerializer;
use crate::catalog::{AssetListing, Catalog};
use crate::config::Config;
use crate::metrics::Metrics;
use crate::server::gate::{is_file, Gate, Resolution};
use crate::transfer::coordinator::{Coordinator, DownloadEvent, DownloadTask};
use crate::transfer::fetcher::{Fetcher, RetryPolicy};
use crate::transfer::session::Sessions;
use crate::transfer::source::{AssetSource, HttpSource};

/// Handle to a bulk download started by [`FontService::start_bulk_download`].
pub struct BulkDownload {
    /// Session id carried by this download's events.
    pub session: u64,

    /// Number of fonts scheduled.
    pub scheduled: usize,

    /// Resolves to the per-font outcomes once the batch ends.
    pub handle: JoinHandle<Vec<DownloadTask>>,
}

pub struct FontService {
    config: Arc<Config>,
    catalog: Arc<Catalog>,
    writer: WriteSerializer,
    fetcher: Arc<Fetcher>,
    coordinator: Arc<Coordinator>,
    gate: Gate,
    sessions: Sessions,
    events: broadcast::Sender<DownloadEvent>,
    metrics: Arc<Metrics>,
}

impl FontService {
    pub fn new(
        config: Arc<Config>,
        catalog: Catalog,
        source: Arc<dyn AssetSource>,
    ) -> Result<Self, prometheus::Error> {
        let metrics = Arc::new(Metrics::new()?);
        let catalog = Arc::new(catalog);
        let store = Arc::new(CacheStore::new(config.storage.state_path()));
        let writer = WriteSerializer::new(store, metrics.clone());

        let cache_dir = config.storage.cache_fonts_dir();
        let fetcher = Arc::new(Fetcher::new(
            source,
            cache_dir.clone(),
            RetryPolicy::from(&config.fetch),
            metrics.clone(),
        ));
        let coordinator = Arc::new(Coordinator::new(fetcher.clone(), writer.clone()));
        let gate = Gate::new(
            cache_dir,
            config.storage.bundled_fonts_dir(),
            catalog.clone(),
            fetcher.clone(),
            writer.clone(),
        );
        let (events, _) = broadcast::channel(config.server.event_buffer.max(1));

        Ok(Self {
            config,
            catalog,
            writer,
            fetcher,
            coordinator,
            gate,
            sessions: Sessions::new(),
            events,
            metrics,
        })
    }

    /// Build the service from configuration: load the manifest and talk HTTP to the origin.
    ///
    /// A manifest that fails to load leaves the catalog empty; the service still
    /// serves cached and bundled fonts but cannot fetch anything until restart.
    pub fn from_config(config: Arc<Config>) -> anyhow::Result<Self> {
        let catalog = match Catalog::load(&config.storage.manifest_path, config.defaults.clone()) {
            Ok(catalog) => catalog,
            Err(e) => {
                error!(
                    path = %config.storage.manifest_path.display(),
                    error = %e,
                    "Font manifest unavailable, on-demand fetching disabled"
                );
                Catalog::empty(config.defaults.clone())
            }
        };
        let source = Arc::new(HttpSource::new(&config.fetch.origin, &config.storage.fonts_dir)?);
        Ok(Self::new(config, catalog, source)?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn store(&self) -> &CacheStore {
        self.writer.store()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Every known font with its cached/default flags.
    pub async fn list_assets(&self) -> Vec<AssetListing> {
        self.catalog.list(self.writer.store()).await
    }

    /// Receive progress events of bulk downloads started after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    /// Start fetching `psns` in the background under a fresh session.
    ///
    /// Any previous session is retired first. Unknown or repeated identities
    /// are skipped.
    pub async fn start_bulk_download(&self, psns: &[String]) -> BulkDownload {
        let mut seen = HashSet::new();
        let mut descriptors = Vec::with_capacity(psns.len());
        for psn in psns {
            if !seen.insert(psn.as_str()) {
                continue;
            }
            match self.catalog.get(psn) {
                Some(descriptor) => descriptors.push(descriptor),
                None => warn!(psn = %psn, "Ignoring unknown font in bulk download"),
            }
        }

        let controller = self.sessions.begin().await;
        let session = controller.id();
        let scheduled = descriptors.len();
        let coordinator = self.coordinator.clone();
        let events = self.events.clone();
        let limit = self.config.fetch.concurrency;

        let handle = tokio::spawn(async move {
            coordinator
                .run(descriptors, limit, controller, move |event| {
                    // No subscribers is fine.
                    let _ = events.send(event);
                })
                .await
        });

        BulkDownload {
            session,
            scheduled,
            handle,
        }
    }

    /// Cancel the live bulk download session. Returns whether one was live.
    pub async fn cancel_session(&self) -> bool {
        self.sessions.cancel().await
    }

    /// On-demand read of a font path relative to the fonts directory.
    pub async fn resolve(&self, rel: &str) -> Resolution {
        self.gate.resolve(rel).await
    }

    /// Remove partial downloads left by a previous process. Run before any fetch.
    pub async fn sweep_stale_downloads(&self) -> usize {
        self.fetcher.sweep_temp_files().await
    }

    /// Fetch default fonts missing from both the cache and the bundled directory.
    ///
    /// Returns the number of fonts fetched. Failures are logged and skipped.
    pub async fn ensure_defaults(&self) -> usize {
        let bundled_dir = self.config.storage.bundled_fonts_dir();
        let mut fetched = 0;

        for descriptor in self.catalog.defaults() {
            let Ok(cached) = self.fetcher.canonical_path(&descriptor.url) else {
                warn!(psn = %descriptor.psn, url = %descriptor.url, "Default font has an unsafe path");
                continue;
            };
            if is_file(&cached).await || is_file(&bundled_dir.join(&descriptor.url)).await {
                continue;
            }

            info!(psn = %descriptor.psn, "Downloading missing default font");
            match self.fetcher.fetch(&descriptor).await {
                Ok(_) => {
                    self.writer
                        .enqueue(vec![CacheRecord::from(descriptor.as_ref())])
                        .await;
                    fetched += 1;
                }
                Err(e) => warn!(psn = %descriptor.psn, error = %e, "Default font download failed"),
            }
        }

        fetched
    }

    /// Wait for queued cache records to be written.
    pub async fn flush(&self) {
        self.writer.flush().await;
    }
}
