//! font-cache server binary.
//!
//! Loads the font manifest, optionally tops up the default fonts, and serves
//! the cache API plus the on-demand font namespace over HTTP.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use font_cache::config::{Cli, Config};
use font_cache::server::api::{build_router, AppState};
use font_cache::service::FontService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "font_cache=debug,tower_http=debug"
    } else {
        "font_cache=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("font-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    let config = Arc::new(config);

    info!(
        cache_root = %config.storage.cache_root.display(),
        bundled_root = %config.storage.bundled_root.display(),
        origin = %config.fetch.origin,
        concurrency = config.fetch.concurrency,
        "Configuration loaded"
    );

    let service = Arc::new(FontService::from_config(config.clone())?);
    service.sweep_stale_downloads().await;

    if cli.skip_defaults {
        info!("Skipping default font check");
    } else {
        let service = service.clone();
        tokio::spawn(async move {
            let fetched = service.ensure_defaults().await;
            if fetched > 0 {
                info!(fetched, "Default fonts downloaded");
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = Arc::new(AppState {
        service: service.clone(),
        start_time: Instant::now(),
        shutdown: shutdown_rx,
    });
    let app = build_router(state);

    let listen_addr = config.server.listen.clone();
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown requested, closing event streams");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Persist anything still queued before exiting.
    service.cancel_session().await;
    service.flush().await;
    info!("Shut down");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
