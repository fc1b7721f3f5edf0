//! Write serializer for the cache record file.
//!
//! Producers call [`WriteSerializer::enqueue`]; records land in a pending
//! buffer and a single drain task writes them out. The drain task takes the
//! whole buffer, merges it into the file by identity, writes, and re-checks
//! the buffer before exiting, so records enqueued mid-write are picked up by
//! the same task, even when the write fails. At most one write is ever in
//! flight, and a drain task is active whenever the buffer is non-empty.

use std::pin::pin;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, error};

use crate::cache::record::{merge, CacheRecord};
use crate::cache::store::CacheStore;
use crate::metrics::Metrics;

#[derive(Default)]
struct WriterState {
    /// Records waiting for the next write.
    pending: Vec<CacheRecord>,

    /// A drain task is active.
    running: bool,
}

struct Inner {
    store: Arc<CacheStore>,
    state: Mutex<WriterState>,
    idle: Notify,
    metrics: Arc<Metrics>,
}

/// Cloneable handle to the single writer of the cache record file.
#[derive(Clone)]
pub struct WriteSerializer {
    inner: Arc<Inner>,
}

impl WriteSerializer {
    pub fn new(store: Arc<CacheStore>, metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                state: Mutex::new(WriterState::default()),
                idle: Notify::new(),
                metrics,
            }),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.inner.store
    }

    /// Queue records for persistence. Returns without waiting for the write.
    pub async fn enqueue(&self, records: Vec<CacheRecord>) {
        if records.is_empty() {
            return;
        }

        let mut state = self.inner.state.lock().await;
        state.pending.extend(records);
        if !state.running {
            state.running = true;
            tokio::spawn(self.inner.clone().drain());
        }
    }

    /// Wait until every queued record has been written (or dropped on error).
    pub async fn flush(&self) {
        loop {
            let mut notified = pin!(self.inner.idle.notified());
            notified.as_mut().enable();

            if !self.inner.state.lock().await.running {
                return;
            }

            notified.await;
        }
    }
}

impl Inner {
    async fn drain(self: Arc<Self>) {
        loop {
            let batch = {
                let mut state = self.state.lock().await;
                if state.pending.is_empty() {
                    state.running = false;
                    self.idle.notify_waiters();
                    return;
                }
                std::mem::take(&mut state.pending)
            };

            let existing = self.store.read_records().await;
            let (merged, added) = merge(existing, batch);
            if added == 0 {
                debug!("No new cache records to persist");
                continue;
            }

            match self.store.write_records(&merged).await {
                Ok(()) => {
                    self.metrics.cache_writes.inc();
                    debug!(added, total = merged.len(), "Persisted cache records");
                }
                // The batch is dropped; anything enqueued meanwhile is still drained.
                Err(e) => {
                    error!(
                        path = %self.store.path().display(),
                        dropped = added,
                        error = %e,
                        "Failed to persist cache records"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn record(psn: &str) -> CacheRecord {
        CacheRecord {
            psn: psn.to_string(),
            url: format!("{psn}.ttf"),
            ff: psn.to_string(),
            fsf: "Regular".to_string(),
        }
    }

    fn writer_in(dir: &TempDir) -> WriteSerializer {
        let store = Arc::new(CacheStore::new(dir.path().join("state.json")));
        WriteSerializer::new(store, Arc::new(Metrics::new().unwrap()))
    }

    #[tokio::test]
    async fn test_enqueue_persists() {
        let tmp = TempDir::new().unwrap();
        let writer = writer_in(&tmp);

        writer.enqueue(vec![record("A")]).await;
        writer.flush().await;

        assert!(writer.store().is_cached("A").await);
        assert_eq!(writer.store().read_records().await, vec![record("A")]);
    }

    #[tokio::test]
    async fn test_duplicate_identity_stored_once() {
        let tmp = TempDir::new().unwrap();
        let writer = writer_in(&tmp);

        writer.enqueue(vec![record("A")]).await;
        writer.enqueue(vec![record("A")]).await;
        writer.flush().await;
        writer.enqueue(vec![record("A")]).await;
        writer.flush().await;

        let records = writer.store().read_records().await;
        assert_eq!(records.iter().filter(|r| r.psn == "A").count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enqueues_lose_nothing() {
        let tmp = TempDir::new().unwrap();
        let writer = writer_in(&tmp);

        let mut handles = Vec::new();
        for i in 0..50 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                writer.enqueue(vec![record(&format!("F{i}"))]).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        writer.flush().await;

        let records = writer.store().read_records().await;
        assert_eq!(records.len(), 50);
        for i in 0..50 {
            assert!(writer.store().is_cached(&format!("F{i}")).await);
        }
    }

    #[tokio::test]
    async fn test_write_failure_is_contained() {
        let tmp = TempDir::new().unwrap();
        // The record file's parent is a regular file, so every write fails.
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let store = Arc::new(CacheStore::new(blocker.join("state.json")));
        let writer = WriteSerializer::new(store, Arc::new(Metrics::new().unwrap()));

        writer.enqueue(vec![record("A")]).await;
        writer.flush().await;

        assert!(!writer.store().is_cached("A").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failed_write_does_not_strand_pending_records() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let store = Arc::new(CacheStore::new(blocker.join("state.json")));
        let writer = WriteSerializer::new(store, Arc::new(Metrics::new().unwrap()));

        let mut handles = Vec::new();
        for i in 0..20 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                writer.enqueue(vec![record(&format!("F{i}"))]).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Without calling flush, the drain must go idle with nothing left behind.
        let idle = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let state = writer.inner.state.lock().await;
                    if !state.running {
                        return state.pending.len();
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(idle, 0);
    }

    #[tokio::test]
    async fn test_flush_when_idle_returns() {
        let tmp = TempDir::new().unwrap();
        let writer = writer_in(&tmp);
        writer.flush().await;
        assert!(writer.store().read_records().await.is_empty());
    }
}
