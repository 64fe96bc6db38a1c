//! Agent relay server.
//!
//! Run with: cargo run -p relay-server
//!
//! Requires `RELAY_TOKEN` (or a `.relay-token` file) and serves the
//! viewer UI from `./public` on http://localhost:3456.

mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use relay_session::{RendezvousCoordinator, SessionRegistry};
use relay_transport::{AppState, create_router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let config = ServerConfig::from_env(&working_dir)?;

    let registry = Arc::new(SessionRegistry::new(config.relay.clone()));
    let sweeper = registry.spawn_expiry_sweeper();
    let relay = RendezvousCoordinator::new(Arc::clone(&registry));

    let public_dir = config.public_dir.is_dir().then(|| config.public_dir.clone());
    if public_dir.is_none() {
        tracing::warn!(dir = %config.public_dir.display(), "public dir missing; not serving UI");
    }
    let app = create_router(AppState::new(relay, config.token.as_str()), public_dir);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Relay server running on http://localhost:{}", config.port);
    tracing::info!("Auth token: {}...", token_prefix(&config.token));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&registry)))
        .await
        .context("server error")?;

    sweeper.abort();
    Ok(())
}

/// Wait for Ctrl-C, then release held-open requests so draining can finish.
async fn shutdown_signal(registry: Arc<SessionRegistry>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
    registry.shutdown().await;
}

fn token_prefix(token: &str) -> &str {
    token
        .char_indices()
        .nth(8)
        .map_or(token, |(idx, _)| &token[..idx])
}
