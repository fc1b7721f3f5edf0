//! Single-asset fetcher.
//!
//! Streams one font from the origin into a sibling temp file, then publishes
//! it at its canonical path with a rename. Readers of the canonical path
//! therefore see either nothing, the previous file, or the complete new file.
//! Failed attempts delete their temp file and are retried after a fixed delay.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::AssetDescriptor;
use crate::config::FetchConfig;
use crate::metrics::Metrics;
use crate::transfer::source::AssetSource;
use crate::transfer::FetchError;

/// Suffix of in-progress downloads.
pub const TEMP_SUFFIX: &str = "part";

/// Attempt budget for a single asset.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Fixed pause between attempts.
    pub retry_delay: Duration,

    /// Deadline for one whole attempt (connect, stream, publish).
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

impl From<&FetchConfig> for RetryPolicy {
    fn from(cfg: &FetchConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            retry_delay: cfg.retry_delay(),
            attempt_timeout: cfg.attempt_timeout(),
        }
    }
}

/// Validate a manifest-relative path. Only plain path segments are allowed.
pub fn safe_relative(url: &str) -> Option<PathBuf> {
    let path = Path::new(url);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => out.push(segment),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

pub struct Fetcher {
    source: Arc<dyn AssetSource>,

    /// Directory fetched fonts are published into.
    root: PathBuf,

    policy: RetryPolicy,

    metrics: Arc<Metrics>,
}

impl Fetcher {
    pub fn new(
        source: Arc<dyn AssetSource>,
        root: PathBuf,
        policy: RetryPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            source,
            root,
            policy,
            metrics,
        }
    }

    /// Final location of a font with relative path `url`.
    pub fn canonical_path(&self, url: &str) -> Result<PathBuf, FetchError> {
        safe_relative(url)
            .map(|rel| self.root.join(rel))
            .ok_or_else(|| FetchError::InvalidPath(url.to_string()))
    }

    /// Delete `*.part` files left under the cache directory by an earlier
    /// process. Call before any fetch starts. Returns the number removed.
    pub async fn sweep_temp_files(&self) -> usize {
        let suffix = format!(".{TEMP_SUFFIX}");
        let mut removed = 0;
        let mut dirs = vec![self.root.clone()];

        while let Some(dir) = dirs.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Failed to scan for stale downloads");
                    continue;
                }
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                match entry.file_type().await {
                    Ok(kind) if kind.is_dir() => dirs.push(path),
                    Ok(kind) if kind.is_file() => {
                        if path.to_string_lossy().ends_with(&suffix) {
                            remove_if_exists(&path).await;
                            removed += 1;
                        }
                    }
                    _ => {}
                }
            }
        }

        if removed > 0 {
            info!(removed, root = %self.root.display(), "Removed stale partial downloads");
        }
        removed
    }

    /// Fetch `descriptor` into the cache directory, retrying per the policy.
    ///
    /// On success the complete file is at the returned canonical path. On
    /// failure neither a temp file nor a new canonical file is left behind.
    pub async fn fetch(&self, descriptor: &AssetDescriptor) -> Result<PathBuf, FetchError> {
        let dest = self.canonical_path(&descriptor.url)?;
        let attempts = self.policy.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            self.metrics.fetch_attempts.inc();
            let tmp = temp_path(&dest);

            let result = match tokio::time::timeout(
                self.policy.attempt_timeout,
                self.attempt(&descriptor.url, &dest, &tmp),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(self.policy.attempt_timeout)),
            };

            match result {
                Ok(bytes) => {
                    self.metrics.fetch_success.inc();
                    info!(psn = %descriptor.psn, bytes, attempt, "Fetched font");
                    return Ok(dest);
                }
                Err(e) => {
                    remove_if_exists(&tmp).await;
                    warn!(
                        psn = %descriptor.psn,
                        attempt,
                        attempts,
                        error = %e,
                        "Font fetch attempt failed"
                    );

                    if attempt >= attempts {
                        self.metrics.fetch_failure.inc();
                        return Err(FetchError::Exhausted {
                            psn: descriptor.psn.clone(),
                            attempts,
                            last: Box::new(e),
                        });
                    }
                }
            }

            tokio::time::sleep(self.policy.retry_delay).await;
            attempt += 1;
        }
    }

    /// One attempt: stream into `tmp`, then publish at `dest`. Returns bytes written.
    async fn attempt(&self, url: &str, dest: &Path, tmp: &Path) -> Result<u64, FetchError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut body = self.source.open(url).await?;
        let mut file = fs::File::create(tmp).await?;
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        debug!(url, tmp = %tmp.display(), written, "Download complete, publishing");

        match fs::remove_file(dest).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::rename(tmp, dest)
            .await
            .map_err(|source| FetchError::Rename {
                path: dest.to_path_buf(),
                source,
            })?;

        Ok(written)
    }
}

/// Unique sibling temp path, so concurrent fetches of one font never share a file.
fn temp_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!("{name}.{}.{TEMP_SUFFIX}", Uuid::new_v4().simple()))
}

async fn remove_if_exists(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed temp file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::source::{Failure, MemorySource};
    use tempfile::TempDir;

    fn descriptor(psn: &str, url: &str) -> AssetDescriptor {
        AssetDescriptor {
            psn: psn.to_string(),
            url: url.to_string(),
            ff: psn.to_string(),
            fsf: "Regular".to_string(),
            flg: 0,
            cat: 0,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            retry_delay: Duration::from_millis(10),
            attempt_timeout: Duration::from_millis(500),
        }
    }

    fn fetcher(tmp: &TempDir, source: MemorySource) -> (Fetcher, Arc<MemorySource>) {
        let source = Arc::new(source);
        let fetcher = Fetcher::new(
            source.clone(),
            tmp.path().join("fonts"),
            fast_policy(),
            Arc::new(Metrics::new().unwrap()),
        );
        (fetcher, source)
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    #[test]
    fn test_safe_relative() {
        assert_eq!(safe_relative("gf/A.otf"), Some(PathBuf::from("gf/A.otf")));
        assert_eq!(safe_relative("./a.ttf"), Some(PathBuf::from("a.ttf")));
        assert_eq!(safe_relative("../etc/passwd"), None);
        assert_eq!(safe_relative("gf/../../x"), None);
        assert_eq!(safe_relative("/abs.ttf"), None);
        assert_eq!(safe_relative(""), None);
    }

    #[test]
    fn test_temp_path_is_distinct_sibling() {
        let dest = Path::new("/cache/fonts/gf/A.otf");
        let a = temp_path(dest);
        let b = temp_path(dest);
        assert_ne!(a, b);
        assert_eq!(a.parent(), dest.parent());
        assert!(a.to_string_lossy().ends_with(".part"));
    }

    #[tokio::test]
    async fn test_fetch_publishes_bytes() {
        let tmp = TempDir::new().unwrap();
        let (fetcher, _) = fetcher(&tmp, MemorySource::new().with_asset("gf/A.otf", &b"alpha"[..]));

        let path = fetcher.fetch(&descriptor("A", "gf/A.otf")).await.unwrap();
        assert_eq!(path, tmp.path().join("fonts/gf/A.otf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"alpha");
        assert_eq!(dir_entries(&tmp.path().join("fonts/gf")), vec!["A.otf".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_replaces_existing_file() {
        let tmp = TempDir::new().unwrap();
        let (fetcher, _) = fetcher(&tmp, MemorySource::new().with_asset("a.ttf", &b"new"[..]));
        std::fs::create_dir_all(tmp.path().join("fonts")).unwrap();
        std::fs::write(tmp.path().join("fonts/a.ttf"), b"old contents").unwrap();

        let path = fetcher.fetch(&descriptor("A", "a.ttf")).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_third_attempt_succeeds() {
        let tmp = TempDir::new().unwrap();
        let (fetcher, source) = fetcher(
            &tmp,
            MemorySource::new().with_failures("a.ttf", &b"alpha"[..], Failure::Status(503), 2),
        );

        let path = fetcher.fetch(&descriptor("A", "a.ttf")).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"alpha");
        assert_eq!(source.attempts("a.ttf"), 3);
    }

    #[tokio::test]
    async fn test_exhausted_leaves_nothing_behind() {
        let tmp = TempDir::new().unwrap();
        let (fetcher, source) = fetcher(
            &tmp,
            MemorySource::new().with_failures("a.ttf", &b"alpha"[..], Failure::Truncate, u32::MAX),
        );

        let err = fetcher.fetch(&descriptor("A", "a.ttf")).await.unwrap_err();
        assert!(matches!(err, FetchError::Exhausted { attempts: 3, .. }));
        assert_eq!(source.attempts("a.ttf"), 3);
        assert!(dir_entries(&tmp.path().join("fonts")).is_empty());
    }

    #[tokio::test]
    async fn test_stalled_attempt_times_out() {
        let tmp = TempDir::new().unwrap();
        let source = MemorySource::new().with_failures("a.ttf", &b"alpha"[..], Failure::Stall, 1);
        let source = Arc::new(source);
        let fetcher = Fetcher::new(
            source.clone(),
            tmp.path().join("fonts"),
            RetryPolicy {
                max_attempts: 2,
                retry_delay: Duration::from_millis(10),
                attempt_timeout: Duration::from_millis(100),
            },
            Arc::new(Metrics::new().unwrap()),
        );

        let path = fetcher.fetch(&descriptor("A", "a.ttf")).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"alpha");
        assert_eq!(source.attempts("a.ttf"), 2);
        assert_eq!(dir_entries(&tmp.path().join("fonts")), vec!["a.ttf".to_string()]);
    }

    #[tokio::test]
    async fn test_in_progress_fetch_is_only_a_temp_file() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(
            MemorySource::new().with_failures("a.ttf", &b"alpha"[..], Failure::Stall, 1),
        );
        let fetcher = Arc::new(Fetcher::new(
            source.clone(),
            tmp.path().join("fonts"),
            RetryPolicy {
                max_attempts: 2,
                retry_delay: Duration::from_millis(10),
                attempt_timeout: Duration::from_millis(400),
            },
            Arc::new(Metrics::new().unwrap()),
        ));

        let handle = {
            let fetcher = fetcher.clone();
            tokio::spawn(async move { fetcher.fetch(&descriptor("A", "a.ttf")).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let during = dir_entries(&tmp.path().join("fonts"));
        assert_eq!(during.len(), 1);
        assert!(during[0].starts_with("a.ttf."));
        assert!(during[0].ends_with(".part"));
        assert!(!tmp.path().join("fonts/a.ttf").exists());

        let path = handle.await.unwrap().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"alpha");
        assert_eq!(dir_entries(&tmp.path().join("fonts")), vec!["a.ttf".to_string()]);
    }

    #[tokio::test]
    async fn test_sweep_removes_stale_temp_files() {
        let tmp = TempDir::new().unwrap();
        let (cache, _) = fetcher(&tmp, MemorySource::new());
        let fonts = tmp.path().join("fonts");
        std::fs::create_dir_all(fonts.join("gf")).unwrap();
        std::fs::write(fonts.join("a.ttf"), b"kept").unwrap();
        std::fs::write(fonts.join("a.ttf.0123abcd.part"), b"half").unwrap();
        std::fs::write(fonts.join("gf/B.otf.4567cdef.part"), b"half").unwrap();

        assert_eq!(cache.sweep_temp_files().await, 2);
        assert_eq!(dir_entries(&fonts).len(), 2);
        assert!(fonts.join("a.ttf").exists());
        assert!(dir_entries(&fonts.join("gf")).is_empty());

        // Nothing left to do on a second pass, or when the directory is missing.
        assert_eq!(cache.sweep_temp_files().await, 0);
        let (empty, _) = fetcher(&TempDir::new().unwrap(), MemorySource::new());
        assert_eq!(empty.sweep_temp_files().await, 0);
    }

    #[tokio::test]
    async fn test_unsafe_path_rejected_without_network() {
        let tmp = TempDir::new().unwrap();
        let (fetcher, source) = fetcher(&tmp, MemorySource::new());

        let err = fetcher.fetch(&descriptor("X", "../x.ttf")).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidPath(_)));
        assert_eq!(source.attempts("../x.ttf"), 0);
    }
}
