//! Beacon Daemon (`beacond`)
//!
//! Headless daemon that verifies, stores, applies, and gossips network
//! alerts. Serves the HTTP health/alert API and keeps sync sessions with
//! configured peers in the background.

mod api;
mod config;
mod node_rpc;
mod service;
mod webhook;

use anyhow::Context;
use clap::Parser;
use config::Args;
use service::Service;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    tracing::info!("beacond v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = args
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    let service = Service::start(config).await.context("failed to start")?;
    tracing::info!("Daemon ready. Press Ctrl+C to stop.");

    // Blocks until a shutdown signal, then drains the workers.
    service.run().await;
    tracing::info!("Daemon stopped");
    Ok(())
}

fn init_logging(verbosity: u8) {
    // RUST_LOG wins; -v/-vv only raise the default level.
    let fallback = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
