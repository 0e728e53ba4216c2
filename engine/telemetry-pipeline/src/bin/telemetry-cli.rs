//! # Telemetry CLI Binary
//!
//! Drives the telemetry pipeline from the command line.

use anyhow::Result;
use clap::Parser;
use telemetry_pipeline::cli::{Cli, CliHandler};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Handle command
    CliHandler.handle_command(cli.command).await?;

    Ok(())
}
