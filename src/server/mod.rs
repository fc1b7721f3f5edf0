//! HTTP surface of the font cache.
//!
//! - [`api`]: JSON routes for listing, bulk download and cancellation
//! - [`gate`]: On-demand resolution of font reads
//! - [`streaming`]: SSE rendering of download progress

pub mod api;
pub mod gate;
pub mod streaming;
