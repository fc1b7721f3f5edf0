//! font-cache: local disk cache for remote font assets.
//!
//! A bundled web application reads fonts from a local path namespace. Fonts
//! present in the user cache or the bundled directory are served directly;
//! a first read of any other catalog font fetches it from the origin while
//! the request waits. The host can also download a selection of fonts in
//! bulk with bounded concurrency, progress events and cancellation.
//!
//! Every fetched font is recorded in a JSON file under the cache root. That
//! file has exactly one writer, the write serializer in [`cache::writer`].

pub mod cache;
pub mod catalog;
pub mod config;
pub mod metrics;
pub mod server;
pub mod service;
pub mod transfer;
