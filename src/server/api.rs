//! HTTP API for the host application.
//!
//! - GET  /api/fonts           list fonts with cached/default flags
//! - POST /api/fonts/download  start a bulk download
//! - POST /api/fonts/cancel    cancel the live bulk download
//! - GET  /api/fonts/events    SSE stream of download progress
//! - GET  /<fonts_dir>/*path   on-demand font reads
//! - GET  /health, /metrics
//!
//! Everything else is served from the cache root, then the bundled root.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::catalog::AssetListing;
use crate::server::gate::serve_font;
use crate::server::streaming::progress_to_sse_stream;
use crate::service::FontService;

/// Application state shared across handlers.
pub struct AppState {
    pub service: Arc<FontService>,
    pub start_time: Instant,
    /// Turns true when the server starts shutting down; ends open event streams.
    pub shutdown: watch::Receiver<bool>,
}

/// Build the axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let storage = &state.service.config().storage;
    let fonts_route = format!("/{}/{{*path}}", storage.fonts_dir.trim_matches('/'));
    let static_files =
        ServeDir::new(&storage.cache_root).fallback(ServeDir::new(&storage.bundled_root));

    Router::new()
        .route("/api/fonts", get(list_fonts))
        .route("/api/fonts/download", post(start_download))
        .route("/api/fonts/cancel", post(cancel_download))
        .route("/api/fonts/events", get(download_events))
        .route(&fonts_route, get(serve_font))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .fallback_service(static_files)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

/// Bulk download request.
#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub psns: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadAccepted {
    pub scheduled: usize,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub fonts: usize,
    pub cached: usize,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn list_fonts(State(state): State<Arc<AppState>>) -> Json<Vec<AssetListing>> {
    Json(state.service.list_assets().await)
}

async fn start_download(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DownloadRequest>,
) -> (StatusCode, Json<DownloadAccepted>) {
    info!(requested = req.psns.len(), "Bulk download request");
    let download = state.service.start_bulk_download(&req.psns).await;
    (
        StatusCode::ACCEPTED,
        Json(DownloadAccepted {
            scheduled: download.scheduled,
        }),
    )
}

async fn cancel_download(State(state): State<Arc<AppState>>) -> StatusCode {
    state.service.cancel_session().await;
    StatusCode::NO_CONTENT
}

async fn download_events(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rx = state.service.subscribe();
    Sse::new(progress_to_sse_stream(rx, state.shutdown.clone())).keep_alive(KeepAlive::default())
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        fonts: state.service.catalog().len(),
        cached: state.service.store().cached_set().await.len(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.service.metrics().render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
