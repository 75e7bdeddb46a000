//! # Claim Notify Runtime
//!
//! Runs the claim notification core as a standalone process.
//!
//! ## Startup Sequence
//!
//! 1. Initialize logging (`RUST_LOG` honored, default `info`)
//! 2. Load configuration (config file, then `CLAIM_NOTIFY_*` environment)
//! 3. Select the bus client (`CLAIM_NOTIFY_BUS`, NATS by default), open the
//!    claim store and wire the notification components
//! 4. Start the connection manager
//! 5. Run until Ctrl+C, then stop
//!
//! Permanent loss of the bus connection exits the process with status 1 so a
//! supervisor can restart it.

use std::sync::Arc;

use anyhow::{Context, Result};
use claim_notify::ProcessExit;
use notify_runtime::{bus_client, NotifyContainer, RuntimeConfig};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = RuntimeConfig::load().context("Failed to load configuration")?;

    info!("===========================================");
    info!("  Claim Notify Runtime v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");

    let client = bus_client(config.bus);
    let container = NotifyContainer::new(config, client, Arc::new(ProcessExit))?;

    container.server.start().await;
    info!(
        primary = container.server.is_primary(),
        bus = %container.config.bus,
        servers = ?container.config.notify.servers,
        "Notification runtime is running. Press Ctrl+C to stop."
    );

    tokio::signal::ctrl_c().await?;

    info!("Initiating graceful shutdown...");
    container.server.stop().await;
    info!("Shutdown complete");

    Ok(())
}
