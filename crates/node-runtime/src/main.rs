//! Orderer executable.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use node_runtime::{config, logging, NodeRuntime};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "orderer")]
#[command(about = "Kafka-backed ordering service")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let logs = logging::init_tracing().context("Failed to initialise logging")?;
    let config = config::load(args.config.as_deref()).context("Failed to load configuration")?;
    logs.apply_verbose(config.kafka.verbose)
        .context("Failed to apply kafka.verbose")?;

    let runtime = NodeRuntime::start(config).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    runtime.shutdown().await
}
