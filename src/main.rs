//! skeld_back - Authoritative game-session server
//!
//! This is the main entry point for the session server. It handles:
//! - The UDP game transport and per-room simulation tasks
//! - HTTP endpoints for health and room administration
//! - Auth service lookups for connection identity
//! - Infraction reporting to the metrics sink

mod anticheat;
mod app;
mod auth;
mod codec;
mod config;
mod game;
mod http;
mod metrics;
mod net;
mod protocol;
mod util;
mod worker;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::http::build_router;
use crate::util::time::init_server_time;
use crate::worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(Config::from_env()?);

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting skeld_back session server");
    info!("Transport address: {}", config.server_addr);

    // Bind the transport and start the worker
    let worker = Worker::bind(config.clone()).await?;
    let worker_task = worker.clone();
    tokio::spawn(async move {
        worker_task.run().await;
    });

    // Build admin router
    let state = AppState::new(config.clone(), worker.clone());
    let router = build_router(state);

    let addr: SocketAddr = config.admin_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Admin listening on {}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Tear every room down before the process exits.
    worker.shutdown().await;

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
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
