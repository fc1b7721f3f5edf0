//! Asset descriptor catalog.
//!
//! - [`descriptor`]: AssetDescriptor and AssetListing types
//! - [`manifest`]: Static manifest parsing, including the compact row form
//!
//! The catalog is loaded once at startup and never mutated afterwards, so it
//! is safe to share behind an `Arc` and query concurrently.

pub mod descriptor;
pub mod manifest;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::cache::store::CacheStore;
use crate::config::DefaultsConfig;
pub use descriptor::{AssetDescriptor, AssetListing};

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed compact manifest row {index}: {row:?}")]
    CompactRow { index: usize, row: String },
}

/// In-memory table of every known remote font asset.
#[derive(Debug, Default)]
pub struct Catalog {
    /// Descriptors in manifest order.
    ordered: Vec<Arc<AssetDescriptor>>,

    /// Identity → descriptor.
    by_psn: HashMap<String, Arc<AssetDescriptor>>,

    /// Relative path → descriptor.
    by_url: HashMap<String, Arc<AssetDescriptor>>,

    /// Always-available fonts.
    defaults: DefaultsConfig,
}

impl Catalog {
    /// A catalog with no entries. Every lookup misses.
    pub fn empty(defaults: DefaultsConfig) -> Self {
        Self {
            defaults,
            ..Default::default()
        }
    }

    /// Build a catalog from descriptors. Later duplicates of an identity are dropped.
    pub fn from_descriptors(descriptors: Vec<AssetDescriptor>, defaults: DefaultsConfig) -> Self {
        let mut catalog = Self::empty(defaults);
        for descriptor in descriptors {
            if catalog.by_psn.contains_key(&descriptor.psn) {
                warn!(psn = %descriptor.psn, "Duplicate identity in manifest, keeping first");
                continue;
            }
            let descriptor = Arc::new(descriptor);
            catalog.by_psn.insert(descriptor.psn.clone(), descriptor.clone());
            catalog.by_url.insert(descriptor.url.clone(), descriptor.clone());
            catalog.ordered.push(descriptor);
        }
        catalog
    }

    /// Read and parse the static manifest.
    pub fn load(path: &Path, defaults: DefaultsConfig) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path)?;
        let descriptors = manifest::parse(&text)?;
        let catalog = Self::from_descriptors(descriptors, defaults);
        info!(path = %path.display(), fonts = catalog.len(), "Loaded font manifest");
        Ok(catalog)
    }

    /// Descriptor for an identity.
    pub fn get(&self, psn: &str) -> Option<Arc<AssetDescriptor>> {
        self.by_psn.get(psn).cloned()
    }

    /// Descriptor whose relative path is `url`.
    pub fn lookup_by_url(&self, url: &str) -> Option<Arc<AssetDescriptor>> {
        self.by_url.get(url).cloned()
    }

    /// Whether `psn` is on the default allow-list.
    pub fn is_default(&self, psn: &str) -> bool {
        self.defaults.is_default(psn)
    }

    /// Every descriptor on the default allow-list, in manifest order.
    pub fn defaults(&self) -> Vec<Arc<AssetDescriptor>> {
        self.ordered
            .iter()
            .filter(|d| self.is_default(&d.psn))
            .cloned()
            .collect()
    }

    /// All descriptors, flagged with their cache state.
    pub async fn list(&self, store: &CacheStore) -> Vec<AssetListing> {
        let cached = store.cached_set().await;
        self.ordered
            .iter()
            .map(|d| {
                let default = self.is_default(&d.psn);
                AssetListing {
                    psn: d.psn.clone(),
                    ff: d.ff.clone(),
                    fsf: d.fsf.clone(),
                    cached: default || cached.contains(&d.psn),
                    default,
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}
