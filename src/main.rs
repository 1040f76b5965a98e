//! CacheDB - A write-behind row cache server
//!
//! Serves the cache over HTTP in front of an in-memory demo backing store.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cachedb::api::{create_router, AppState};
use cachedb::{CacheDb, Config, MemoryBackend};

/// Main entry point for the CacheDB server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the cache (replays the write-ahead log, starts background tasks)
/// 4. Start HTTP server on configured port
/// 5. On SIGINT/SIGTERM stop serving and drain the cache
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cachedb=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CacheDB server");

    let config = Config::from_env();
    info!(
        ttl_ms = config.ttl.as_millis() as u64,
        sweep_ms = config.sweep_interval.as_millis() as u64,
        queue_capacity = config.queue_capacity,
        wal = %config.wal_path.display(),
        port = config.server_port,
        "Configuration loaded"
    );

    let backend = Arc::new(
        MemoryBackend::new()
            .with_table("users", &["id"], &["name", "email"])
            .with_table("orders", &["order_id"], &["status", "total"])
            .with_table("order_items", &["order_id", "item_id"], &["qty", "price"]),
    );

    let cache = Arc::new(
        CacheDb::open(config.clone(), backend)
            .await
            .context("failed to open cache")?,
    );

    let app = create_router(AppState::new(cache.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    cache.shutdown().await.context("failed to drain cache")?;
    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
