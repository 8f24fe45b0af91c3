//! services/api/src/bin/edubase-to-pdf.rs

use api_lib::{
    adapters::{ChromiumLauncher, LopdfAssembler},
    cli::{run_import, run_server, Cli, Command},
    config::Config,
    error::ApiError,
};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    let cli = Cli::parse();

    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded.");

    // --- 2. Run the Command ---
    match cli.command {
        Command::Import(args) => {
            let launcher = ChromiumLauncher::new();
            run_import(args, &config, &launcher, Arc::new(LopdfAssembler::new())).await?;
        }
        Command::Server(args) => run_server(args, config).await?,
    }

    Ok(())
}
