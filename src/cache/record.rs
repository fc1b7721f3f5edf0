//! Cache records.
//!
//! A record's presence in the backing file is the "is cached" fact for its
//! identity. Records are never overwritten: the first one stored for an
//! identity wins.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::catalog::AssetDescriptor;

/// Persisted subset of an [`AssetDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub psn: String,
    pub url: String,
    pub ff: String,
    pub fsf: String,
}

impl From<&AssetDescriptor> for CacheRecord {
    fn from(d: &AssetDescriptor) -> Self {
        Self {
            psn: d.psn.clone(),
            url: d.url.clone(),
            ff: d.ff.clone(),
            fsf: d.fsf.clone(),
        }
    }
}

/// Append `incoming` records whose identity is not yet in `existing`.
///
/// Linear in the total number of records. Duplicates inside either input
/// collapse to their first occurrence. Returns the merged list and the
/// number of records added.
pub fn merge(existing: Vec<CacheRecord>, incoming: Vec<CacheRecord>) -> (Vec<CacheRecord>, usize) {
    let mut seen: HashSet<String> = HashSet::with_capacity(existing.len() + incoming.len());
    let mut merged = Vec::with_capacity(existing.len() + incoming.len());

    for record in existing {
        if seen.insert(record.psn.clone()) {
            merged.push(record);
        }
    }
    let before = merged.len();
    for record in incoming {
        if seen.insert(record.psn.clone()) {
            merged.push(record);
        }
    }

    let added = merged.len() - before;
    (merged, added)
}
