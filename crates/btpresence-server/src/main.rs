//! # btpresence-server
//!
//! Runs the Bluetooth presence tracker and serves its state over HTTP.
//!
//! ## Running
//!
//! ```bash
//! # Development, simulated radio
//! cargo run --package btpresence-server
//!
//! # Production, BlueZ
//! cargo build --release --package btpresence-server --features bluetooth
//! BTPRESENCE_CONFIG=/etc/btpresence/config.toml ./btpresence-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use btpresence_core::{Config, TokioScheduler};
use btpresence_server::api::create_router;
use btpresence_server::state::AppState;
use btpresence_server::{logging, radio};
use chrono::Utc;
use tokio::net::TcpListener;
use tracing::info;

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "BTPRESENCE_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os(CONFIG_ENV).map_or_else(Config::default_path, PathBuf::from);
    let config = Config::load(Some(&config_path))
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    logging::init(&logging::LogMode::from_config(&config.server))?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting btpresence-server"
    );

    config.validate().context("invalid configuration")?;

    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind_address))?;

    let radio = radio::build(&config).await?;
    let mut state = AppState::initialize(config, radio).await?;
    let poll_loop = state.start_polling(Arc::new(TokioScheduler::new()), Utc::now());

    let app = create_router(state.shared());
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    poll_loop.stop();
    info!("Stopped btpresence-server");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
