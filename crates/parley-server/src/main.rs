//! # Parley Server
//!
//! Real-time room chat over WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! parley
//!
//! # Run with environment variables
//! PARLEY_PORT=8080 PARLEY_HOST=0.0.0.0 parley
//! ```
//!
//! A `parley.toml` in the working directory, `/etc/parley/` or
//! `~/.config/parley/` is picked up automatically.

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,parley_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!("Starting Parley server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
