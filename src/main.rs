//! BikeJJ game host - headless pedal race server
//!
//! This is the main entry point for the game host. It handles:
//! - The authoritative game session (simulation, win detection, lifecycle)
//! - Polling and reconnecting to the external energy source
//! - HTTP and WebSocket endpoints for the game UI
//! - Local persistence of tuning and match reports

mod app;
mod config;
mod game;
mod http;
mod store;
mod util;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::http::build_router;
use crate::store::{FileStore, MemoryStore, SharedStore};
use crate::util::time::init_host_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize host time tracking
    init_host_time();

    info!("Starting BikeJJ game host");
    info!("Server address: {}", config.server_addr);
    info!("Energy source: {}", config.energy_source_url);

    // Local storage; the game still runs without it
    let storage: SharedStore = match FileStore::open(&config.storage_dir) {
        Ok(store) => {
            info!(dir = %store.dir().display(), "Using file storage");
            Arc::new(store)
        }
        Err(e) => {
            warn!(error = %e, "Storage directory unusable, keeping data in memory");
            Arc::new(MemoryStore::new())
        }
    };

    // Create application state and the session task
    let (state, runner) = AppState::new(config.clone(), storage).await?;
    tokio::spawn(runner.run());

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
