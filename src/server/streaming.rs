//! SSE (Server-Sent Events) streaming for download progress.
//!
//! Converts the service's broadcast channel into an SSE stream. Each event is
//! named after its kind (`progress`, `finished`) and carries the JSON encoding
//! of the [`DownloadEvent`]. Streams end when the server begins shutting
//! down, so graceful shutdown is not held up by connected subscribers.

use axum::response::sse::Event;
use futures::stream::Stream;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::warn;

use crate::transfer::coordinator::DownloadEvent;

/// Name of the SSE event for a download event.
pub fn event_name(event: &DownloadEvent) -> &'static str {
    match event {
        DownloadEvent::Progress { .. } => "progress",
        DownloadEvent::Finished { .. } => "finished",
    }
}

/// Convert a download event receiver into an SSE stream.
///
/// A slow client that falls behind the broadcast buffer skips the missed
/// events rather than ending the stream. The stream ends once `shutdown`
/// turns true or its sender is dropped.
pub fn progress_to_sse_stream(
    rx: broadcast::Receiver<DownloadEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    let stopped = async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
    };

    let events = BroadcastStream::new(rx).filter_map(|item| match item {
        Ok(event) => {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Some(Ok(Event::default().event(event_name(&event)).data(data)))
        }
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "Progress subscriber lagged, events dropped");
            None
        }
    });

    futures::StreamExt::take_until(events, Box::pin(stopped))
}
