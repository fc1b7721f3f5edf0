//! Bounded download coordinator.
//!
//! Runs many single-asset fetches with at most `limit` outstanding at once,
//! reports progress in completion order and honours session cancellation.
//! Cancellation is advisory: it is checked when a fetch is about to start
//! and again when it completes. In-flight transfers are never aborted.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::record::CacheRecord;
use crate::cache::writer::WriteSerializer;
use crate::catalog::AssetDescriptor;
use crate::transfer::fetcher::Fetcher;
use crate::transfer::session::SessionController;

/// Progress reported to the caller of a bulk download.
///
/// Every event carries the id of the session that produced it, so a
/// subscriber can tell a retired run's late events from the live run's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// One non-cancelled fetch finished.
    Progress {
        session: u64,
        completed: usize,
        total: usize,
        psn: String,
        is_error: bool,
    },
    /// Every fetch of the batch finished. Never sent for a cancelled batch.
    Finished {
        session: u64,
        total: usize,
        errors: usize,
    },
}

impl DownloadEvent {
    /// Id of the session the event belongs to.
    pub fn session(&self) -> u64 {
        match self {
            DownloadEvent::Progress { session, .. } | DownloadEvent::Finished { session, .. } => {
                *session
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed(String),
    Cancelled,
}

/// One scheduled fetch and how it ended.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub descriptor: Arc<AssetDescriptor>,
    pub outcome: Outcome,
}

pub struct Coordinator {
    fetcher: Arc<Fetcher>,
    writer: WriteSerializer,
}

impl Coordinator {
    pub fn new(fetcher: Arc<Fetcher>, writer: WriteSerializer) -> Self {
        Self { fetcher, writer }
    }

    /// Fetch every descriptor, at most `limit` at a time.
    ///
    /// `on_event` receives a progress event per non-cancelled completion and
    /// a final [`DownloadEvent::Finished`] once all of them completed.
    /// Successful fetches are queued for persistence.
    pub async fn run<F>(
        &self,
        descriptors: Vec<Arc<AssetDescriptor>>,
        limit: usize,
        controller: Arc<SessionController>,
        mut on_event: F,
    ) -> Vec<DownloadTask>
    where
        F: FnMut(DownloadEvent),
    {
        let total = descriptors.len();
        let limit = limit.max(1);
        let session = controller.id();
        info!(session = controller.id(), total, limit, "Starting bulk download");

        let mut completions = stream::iter(descriptors)
            .map(|descriptor| {
                let fetcher = self.fetcher.clone();
                let controller = controller.clone();
                async move {
                    if controller.is_cancelled() {
                        return DownloadTask {
                            descriptor,
                            outcome: Outcome::Cancelled,
                        };
                    }

                    let result = fetcher.fetch(&descriptor).await;
                    let outcome = match result {
                        _ if controller.is_cancelled() => Outcome::Cancelled,
                        Ok(_) => Outcome::Succeeded,
                        Err(e) => Outcome::Failed(e.to_string()),
                    };
                    DownloadTask {
                        descriptor,
                        outcome,
                    }
                }
            })
            .buffer_unordered(limit);

        let mut tasks = Vec::with_capacity(total);
        let mut completed = 0;
        let mut errors = 0;

        while let Some(task) = completions.next().await {
            let psn = task.descriptor.psn.clone();
            match &task.outcome {
                Outcome::Cancelled => {
                    debug!(psn = %psn, "Skipped cancelled fetch");
                }
                Outcome::Succeeded => {
                    completed += 1;
                    self.writer
                        .enqueue(vec![CacheRecord::from(task.descriptor.as_ref())])
                        .await;
                    on_event(DownloadEvent::Progress {
                        session,
                        completed,
                        total,
                        psn,
                        is_error: false,
                    });
                }
                Outcome::Failed(reason) => {
                    completed += 1;
                    errors += 1;
                    warn!(psn = %psn, reason = %reason, "Font download failed");
                    on_event(DownloadEvent::Progress {
                        session,
                        completed,
                        total,
                        psn,
                        is_error: true,
                    });
                }
            }
            tasks.push(task);
        }

        if completed == total {
            info!(session = controller.id(), total, errors, "Bulk download finished");
            on_event(DownloadEvent::Finished {
                session,
                total,
                errors,
            });
        } else {
            info!(
                session = controller.id(),
                completed,
                cancelled = total - completed,
                "Bulk download cancelled"
            );
        }

        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::CacheStore;
    use crate::metrics::Metrics;
    use crate::transfer::fetcher::RetryPolicy;
    use crate::transfer::source::{Failure, MemorySource};
    use std::time::Duration;
    use tempfile::TempDir;

    fn descriptor(psn: &str, url: &str) -> Arc<AssetDescriptor> {
        Arc::new(AssetDescriptor {
            psn: psn.to_string(),
            url: url.to_string(),
            ff: psn.to_string(),
            fsf: "Regular".to_string(),
            flg: 0,
            cat: 0,
        })
    }

    fn coordinator(tmp: &TempDir, source: Arc<MemorySource>) -> (Coordinator, WriteSerializer) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let fetcher = Arc::new(Fetcher::new(
            source,
            tmp.path().join("fonts"),
            RetryPolicy {
                max_attempts: 3,
                retry_delay: Duration::from_millis(5),
                attempt_timeout: Duration::from_secs(5),
            },
            metrics.clone(),
        ));
        let store = Arc::new(CacheStore::new(tmp.path().join("state.json")));
        let writer = WriteSerializer::new(store, metrics);
        (Coordinator::new(fetcher, writer.clone()), writer)
    }

    #[tokio::test]
    async fn test_success_and_failure_progress() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(
            MemorySource::new()
                .with_asset("a.ttf", &b"alpha"[..])
                .with_failures("b.ttf", &b"beta"[..], Failure::Status(500), u32::MAX),
        );
        let (coordinator, writer) = coordinator(&tmp, source);

        let mut events = Vec::new();
        let tasks = coordinator
            .run(
                vec![descriptor("A", "a.ttf"), descriptor("B", "b.ttf")],
                1,
                Arc::new(SessionController::new(3)),
                |event| events.push(event),
            )
            .await;

        assert_eq!(
            events,
            vec![
                DownloadEvent::Progress {
                    session: 3,
                    completed: 1,
                    total: 2,
                    psn: "A".to_string(),
                    is_error: false
                },
                DownloadEvent::Progress {
                    session: 3,
                    completed: 2,
                    total: 2,
                    psn: "B".to_string(),
                    is_error: true
                },
                DownloadEvent::Finished {
                    session: 3,
                    total: 2,
                    errors: 1
                },
            ]
        );
        assert_eq!(tasks.len(), 2);
        assert!(tmp.path().join("fonts/a.ttf").exists());
        assert!(!tmp.path().join("fonts/b.ttf").exists());

        writer.flush().await;
        assert!(writer.store().is_cached("A").await);
        assert!(!writer.store().is_cached("B").await);
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let tmp = TempDir::new().unwrap();
        let mut source = MemorySource::new().with_latency(Duration::from_millis(30));
        let mut descriptors = Vec::new();
        for i in 0..10 {
            let url = format!("f{i}.ttf");
            source = source.with_asset(&url, &b"font"[..]);
            descriptors.push(descriptor(&format!("F{i}"), &url));
        }
        let source = Arc::new(source);
        let (coordinator, _) = coordinator(&tmp, source.clone());

        let tasks = coordinator
            .run(descriptors, 3, Arc::new(SessionController::new(0)), |_| {})
            .await;

        assert!(tasks.iter().all(|t| t.outcome == Outcome::Succeeded));
        assert!(source.peak_in_flight() <= 3);
        assert!(source.peak_in_flight() >= 2);
    }

    #[tokio::test]
    async fn test_cancel_stops_unstarted_fetches() {
        let tmp = TempDir::new().unwrap();
        let mut source = MemorySource::new().with_latency(Duration::from_millis(10));
        let mut descriptors = Vec::new();
        for i in 0..6 {
            let url = format!("f{i}.ttf");
            source = source.with_asset(&url, &b"font"[..]);
            descriptors.push(descriptor(&format!("F{i}"), &url));
        }
        let source = Arc::new(source);
        let (coordinator, writer) = coordinator(&tmp, source.clone());
        let controller = Arc::new(SessionController::new(7));

        let mut events = Vec::new();
        let tasks = coordinator
            .run(descriptors, 1, controller.clone(), |event| {
                // Cancel as soon as the first fetch is reported.
                controller.cancel();
                events.push(event);
            })
            .await;

        assert_eq!(events.len(), 1);
        assert!(!events.iter().any(|e| matches!(e, DownloadEvent::Finished { .. })));
        let cancelled = tasks
            .iter()
            .filter(|t| t.outcome == Outcome::Cancelled)
            .count();
        assert_eq!(cancelled, 5);

        // Only the first font was ever requested.
        assert_eq!(source.attempts("f0.ttf"), 1);
        for i in 1..6 {
            assert_eq!(source.attempts(&format!("f{i}.ttf")), 0);
        }

        writer.flush().await;
        assert_eq!(writer.store().read_records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_success_after_cancel_is_not_reported() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(
            MemorySource::new()
                .with_asset("a.ttf", &b"alpha"[..])
                .with_latency(Duration::from_millis(50)),
        );
        let (coordinator, writer) = coordinator(&tmp, source);
        let controller = Arc::new(SessionController::new(1));

        let cancel = {
            let controller = controller.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                controller.cancel();
            }
        };
        let mut events = Vec::new();
        let run = coordinator.run(vec![descriptor("A", "a.ttf")], 4, controller.clone(), |event| {
            events.push(event)
        });
        let (tasks, ()) = tokio::join!(run, cancel);

        assert!(events.is_empty());
        assert_eq!(tasks[0].outcome, Outcome::Cancelled);
        // The transfer itself was allowed to complete.
        assert!(tmp.path().join("fonts/a.ttf").exists());
        writer.flush().await;
        assert!(!writer.store().is_cached("A").await);
    }

    #[tokio::test]
    async fn test_empty_batch_finishes_immediately() {
        let tmp = TempDir::new().unwrap();
        let (coordinator, _) = coordinator(&tmp, Arc::new(MemorySource::new()));

        let mut events = Vec::new();
        let tasks = coordinator
            .run(vec![], 16, Arc::new(SessionController::new(0)), |event| {
                events.push(event)
            })
            .await;

        assert!(tasks.is_empty());
        assert_eq!(
            events,
            vec![DownloadEvent::Finished {
                session: 0,
                total: 0,
                errors: 0
            }]
        );
    }
}
