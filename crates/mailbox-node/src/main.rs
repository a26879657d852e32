//! # Mailbox Node
//!
//! Runs one rack behind the HTTP front until Ctrl+C.

use anyhow::{Context, Result};
use tracing::info;

use mailbox_node::{NodeConfig, NodeRuntime};
use mailbox_telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging and metrics
    let _telemetry = init_telemetry(TelemetryConfig::for_component("node"))
        .context("Failed to initialize telemetry")?;

    // Load configuration
    let config = NodeConfig::from_env().context("Invalid configuration")?;

    let runtime = NodeRuntime::new(config);
    let addr = runtime.start().await?;

    info!(%addr, "Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown().await;

    Ok(())
}
