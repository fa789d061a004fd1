//! # Relay-Pool Runtime
//!
//! `pool-runtime --config pool.toml`

use anyhow::{Context, Result};
use clap::Parser;
use pool_runtime::container::PoolConfig;
use pool_runtime::PoolRuntime;
use pool_telemetry::{init_telemetry, TelemetryConfig};
use std::path::PathBuf;
use tracing::info;

/// Relay-pool process: primary, relay or collector, chosen by configuration.
#[derive(Parser, Debug)]
#[command(name = "pool-runtime")]
#[command(about = "Relay synchronization and failover runtime for a multi-region mining pool")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "pool.toml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = PoolConfig::load(&args.config)
        .with_context(|| format!("Invalid configuration in {}", args.config.display()))?;

    let _telemetry = init_telemetry(TelemetryConfig::for_role(config.mode.name()))
        .context("Failed to initialize telemetry")?;

    if args.check {
        info!(role = config.mode.name(), "Configuration valid");
        return Ok(());
    }

    let mut runtime = PoolRuntime::new(config);
    let _handles = runtime.start().await?;

    info!("Pool runtime is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    runtime.shutdown().await;
    Ok(())
}
