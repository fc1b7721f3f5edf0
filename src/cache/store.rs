//! Cache state store.
//!
//! Holds the backing record file and an in-memory set of cached identities.
//! The set is rebuilt from the file on first access; afterwards membership
//! checks never touch the disk.
//!
//! Unreadable or corrupt backing data is logged and treated as empty. Losing
//! the cached flag is acceptable; the font bytes themselves stay on disk.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cache::record::CacheRecord;
use crate::cache::PersistenceError;

pub struct CacheStore {
    /// Backing record file.
    path: PathBuf,

    /// Cached identities. `None` until first access.
    known: RwLock<Option<HashSet<String>>>,
}

impl CacheStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            known: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a record exists for `psn`.
    pub async fn is_cached(&self, psn: &str) -> bool {
        self.ensure_loaded().await;
        self.known
            .read()
            .await
            .as_ref()
            .is_some_and(|known| known.contains(psn))
    }

    /// Snapshot of every cached identity.
    pub async fn cached_set(&self) -> HashSet<String> {
        self.ensure_loaded().await;
        self.known.read().await.clone().unwrap_or_default()
    }

    async fn ensure_loaded(&self) {
        if self.known.read().await.is_some() {
            return;
        }

        let mut known = self.known.write().await;
        if known.is_none() {
            let records = self.read_records().await;
            debug!(path = %self.path.display(), records = records.len(), "Loaded cache records");
            *known = Some(records.into_iter().map(|r| r.psn).collect());
        }
    }

    /// Read the backing file. Missing, unreadable or corrupt data reads as empty.
    pub async fn read_records(&self) -> Vec<CacheRecord> {
        let data = match fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cache record file unreadable, treating as empty");
                return Vec::new();
            }
        };

        match serde_json::from_str(&data) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cache record file corrupt, treating as empty");
                Vec::new()
            }
        }
    }

    /// Replace the backing file with `records`.
    ///
    /// Written to a sibling temp file and renamed into place so a crash never
    /// leaves a truncated record file. Only the write serializer calls this.
    pub(crate) async fn write_records(&self, records: &[CacheRecord]) -> Result<(), PersistenceError> {
        let data = serde_json::to_vec(records)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &data).await?;
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        *self.known.write().await = Some(records.iter().map(|r| r.psn.clone()).collect());
        Ok(())
    }
}
