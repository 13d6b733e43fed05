//! # SUMARiS Node
//!
//! Entry point of the standalone entity-event bridge.

use anyhow::{Context, Result};
use sumaris_node::{load_config, NodeRuntime};
use sumaris_telemetry::init_telemetry;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    // Initialize logging and metrics
    let _telemetry = init_telemetry(config.telemetry.clone()).context("Failed to initialize telemetry")?;

    // Create and start the node runtime
    let mut runtime = NodeRuntime::new(config)?;
    runtime.start();

    // Keep the node running
    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    // Graceful shutdown
    runtime.shutdown().await;

    Ok(())
}
