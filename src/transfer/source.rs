//! Remote origin access.
//!
//! The fetcher only needs "GET this path, give me the status and a byte
//! stream", so that is all [`AssetSource`] asks for. [`HttpSource`] is the
//! production implementation; tests substitute in-memory sources.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};

use crate::transfer::FetchError;

/// Body of a successful response.
pub type ByteStream = BoxStream<'static, Result<Bytes, FetchError>>;

#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Start a GET for `url`, relative to the origin's fonts directory.
    ///
    /// Any non-success status must be reported as [`FetchError::Status`].
    async fn open(&self, url: &str) -> Result<ByteStream, FetchError>;
}

/// Fetches fonts over HTTP(S) with reqwest.
pub struct HttpSource {
    client: reqwest::Client,

    /// Origin plus fonts directory, with trailing slash.
    base: String,
}

impl HttpSource {
    pub fn new(origin: &str, fonts_dir: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("font-cache/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut base = origin.trim_end_matches('/').to_string();
        base.push('/');
        let fonts_dir = fonts_dir.trim_matches('/');
        if !fonts_dir.is_empty() {
            base.push_str(fonts_dir);
            base.push('/');
        }

        Ok(Self { client, base })
    }

    /// Absolute URL for a relative font path.
    pub fn url_for(&self, url: &str) -> String {
        format!("{}{}", self.base, url.trim_start_matches('/'))
    }
}

#[async_trait]
impl AssetSource for HttpSource {
    async fn open(&self, url: &str) -> Result<ByteStream, FetchError> {
        let response = self.client.get(self.url_for(url)).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(FetchError::from))
            .boxed())
    }
}

/// How a [`MemorySource`] asset misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Respond with this HTTP status.
    Status(u16),
    /// Send half the body, then break the stream.
    Truncate,
    /// Never send the body.
    Stall,
}

struct MemoryAsset {
    body: Bytes,
    failure: Failure,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

/// Decrements the in-flight counter when a response body is finished or dropped.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Origin backed by an in-memory table, for hosts without network access and tests.
///
/// Unknown paths answer 404. Assets can be configured to fail a number of
/// attempts before succeeding. The source records attempts per path and
/// the peak number of concurrently open responses.
#[derive(Default)]
pub struct MemorySource {
    assets: HashMap<String, MemoryAsset>,
    latency: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` at `url`.
    pub fn with_asset(self, url: &str, body: impl Into<Bytes>) -> Self {
        self.with_failures(url, body, Failure::Status(500), 0)
    }

    /// Serve `body` at `url` after `count` failed attempts. `u32::MAX` fails forever.
    pub fn with_failures(mut self, url: &str, body: impl Into<Bytes>, failure: Failure, count: u32) -> Self {
        self.assets.insert(
            url.to_string(),
            MemoryAsset {
                body: body.into(),
                failure,
                failures_left: AtomicU32::new(count),
                attempts: AtomicU32::new(0),
            },
        );
        self
    }

    /// Delay every response body by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of times `url` was requested.
    pub fn attempts(&self, url: &str) -> u32 {
        self.assets
            .get(url)
            .map_or(0, |asset| asset.attempts.load(Ordering::SeqCst))
    }

    /// Highest number of responses open at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetSource for MemorySource {
    async fn open(&self, url: &str) -> Result<ByteStream, FetchError> {
        let asset = self.assets.get(url).ok_or(FetchError::Status(404))?;
        asset.attempts.fetch_add(1, Ordering::SeqCst);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(self.in_flight.clone());
        let latency = self.latency;

        let failing = asset
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok();

        if !failing {
            let body = asset.body.clone();
            return Ok(stream::once(async move {
                tokio::time::sleep(latency).await;
                drop(guard);
                Ok(body)
            })
            .boxed());
        }

        match asset.failure {
            Failure::Status(code) => {
                tokio::time::sleep(latency).await;
                drop(guard);
                Err(FetchError::Status(code))
            }
            Failure::Truncate => {
                let half = asset.body.slice(..asset.body.len() / 2);
                Ok(stream::iter(vec![
                    Ok(half),
                    Err(FetchError::Stream("connection reset".to_string())),
                ])
                .map(move |item| {
                    let _held = &guard;
                    item
                })
                .boxed())
            }
            Failure::Stall => Ok(stream::once(async move {
                let _guard = guard;
                futures::future::pending::<()>().await;
                Ok(Bytes::new())
            })
            .boxed()),
        }
    }
}
