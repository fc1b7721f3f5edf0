//! Runtime configuration for font-cache.
//!
//! Configuration is loaded from a JSON file or constructed programmatically.
//! Storage roots, origin settings and the fetch retry policy all live here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "font-cache", about = "Local font asset cache with on-demand fetching")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "font-cache.config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Do not fetch missing default fonts at startup.
    #[arg(long)]
    pub skip_defaults: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Filesystem layout.
    pub storage: StorageConfig,

    /// Remote origin and retry policy.
    pub fetch: FetchConfig,

    /// Identity prefixes of fonts that are always available.
    pub defaults: DefaultsConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "127.0.0.1:8887").
    pub listen: String,

    /// Capacity of the progress event broadcast channel.
    pub event_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8887".to_string(),
            event_buffer: 256,
        }
    }
}

/// Where things live on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// User-writable root. Fetched fonts and the record file go here.
    pub cache_root: PathBuf,

    /// Read-only root shipped with the application.
    pub bundled_root: PathBuf,

    /// Relative directory (under both roots and the origin) holding fonts.
    pub fonts_dir: String,

    /// Static font manifest produced by packaging.
    pub manifest_path: PathBuf,

    /// Name of the record file under `cache_root`.
    pub state_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("cache"),
            bundled_root: PathBuf::from("www.photopea.com"),
            fonts_dir: "rsrc/fonts".to_string(),
            manifest_path: PathBuf::from("www.photopea.com/font-manifest.json"),
            state_file: "font-cache.json".to_string(),
        }
    }
}

impl StorageConfig {
    /// Directory holding fetched fonts.
    pub fn cache_fonts_dir(&self) -> PathBuf {
        self.cache_root.join(&self.fonts_dir)
    }

    /// Directory holding fonts shipped with the application.
    pub fn bundled_fonts_dir(&self) -> PathBuf {
        self.bundled_root.join(&self.fonts_dir)
    }

    /// Full path of the cache record file.
    pub fn state_path(&self) -> PathBuf {
        self.cache_root.join(&self.state_file)
    }
}

/// Origin and retry policy for single-asset fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Base URL of the remote origin, with trailing slash.
    pub origin: String,

    /// Total attempts per asset, including the first.
    pub max_attempts: u32,

    /// Fixed pause between attempts in milliseconds.
    pub retry_delay_ms: u64,

    /// Per-attempt timeout in milliseconds.
    pub attempt_timeout_ms: u64,

    /// Maximum outstanding fetches during a bulk download.
    pub concurrency: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            origin: "https://www.photopea.com/".to_string(),
            max_attempts: 3,
            retry_delay_ms: 1_000,
            attempt_timeout_ms: 15_000,
            concurrency: 16,
        }
    }
}

impl FetchConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Built-in allow-list of fonts that are always considered available.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// A font is a default if its identity equals a prefix or starts with `prefix-`.
    pub prefixes: Vec<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            prefixes: vec!["DejaVuSans".to_string()],
        }
    }
}

impl DefaultsConfig {
    /// Whether `psn` belongs to the default allow-list.
    ///
    /// `DejaVuSans` and `DejaVuSans-Bold` match the `DejaVuSans` prefix,
    /// `DejaVuSansCondensed` does not.
    pub fn is_default(&self, psn: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            psn == prefix
                || psn
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('-'))
        })
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Configuration rooted in `dir`, used by tests and embedding hosts.
    pub fn rooted_at(dir: &Path) -> Self {
        let mut config = Config::default();
        config.storage.cache_root = dir.join("cache");
        config.storage.bundled_root = dir.join("bundled");
        config.storage.manifest_path = dir.join("font-manifest.json");
        config
    }
}
