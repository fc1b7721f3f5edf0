//! Font asset descriptors.
//!
//! A descriptor names one downloadable font file. Descriptors are immutable
//! once loaded and are shared as `Arc<AssetDescriptor>`.

use serde::{Deserialize, Serialize};

/// One remote font asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    /// PostScript name. Stable, globally unique identity.
    pub psn: String,

    /// Path relative to the fonts directory, e.g. `gf/Roboto-Regular.otf`.
    pub url: String,

    /// Family name.
    pub ff: String,

    /// Subfamily (style) name.
    pub fsf: String,

    /// Display flags carried over from the manifest.
    #[serde(default)]
    pub flg: i64,

    /// Display category carried over from the manifest.
    #[serde(default)]
    pub cat: i64,
}

/// A descriptor as presented to the font picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetListing {
    pub psn: String,
    pub ff: String,
    pub fsf: String,
    /// Bytes are known to be available locally.
    pub cached: bool,
    /// Part of the built-in default allow-list.
    pub default: bool,
}
