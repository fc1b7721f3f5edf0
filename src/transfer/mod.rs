//! Moving font bytes from the remote origin into the cache directory.
//!
//! - [`source`]: The origin seam (`AssetSource`) and its reqwest implementation
//! - [`fetcher`]: Single-asset fetch with temp file, atomic publish and retries
//! - [`coordinator`]: Bounded-concurrency bulk downloads with progress events
//! - [`session`]: Cancellation controllers for bulk download sessions

pub mod coordinator;
pub mod fetcher;
pub mod session;
pub mod source;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Origin responded with HTTP {0}")]
    Status(u16),

    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to publish {path}: {source}")]
    Rename {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing unsafe asset path {0:?}")]
    InvalidPath(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Gave up on {psn} after {attempts} attempts: {last}")]
    Exhausted {
        psn: String,
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}
