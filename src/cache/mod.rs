//! Durable record of which fonts have been fetched.
//!
//! - [`record`]: CacheRecord and the identity-deduplicating merge
//! - [`store`]: Backing file plus the in-memory membership set
//! - [`writer`]: Write serializer, the only path that mutates the backing file

pub mod record;
pub mod store;
pub mod writer;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error on cache record file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode cache records: {0}")]
    Json(#[from] serde_json::Error),
}
