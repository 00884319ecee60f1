use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use filecast::cli::{Cli, Commands};
use filecast::config::Config;
use filecast::logging::{init_early_logging, init_logging};
use filecast::metrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };

    let config = match Config::load(&root) {
        Ok(config) => config,
        Err(e) => {
            init_early_logging();
            tracing::error!("Failed to load configuration: {:#}", e);
            return Err(e);
        }
    };

    // The guard MUST be held until program exit to ensure logs are flushed
    let _logging_guard = init_logging(&config.logging, &root)?;

    tracing::info!("filecast starting up");
    tracing::debug!("Project root: {}", root.display());

    metrics::register_metrics();

    match cli.command {
        Commands::Init => {
            filecast::commands::init::run(&root).await?;
        }
        Commands::Serve {
            port,
            host,
            debounce_ms,
        } => {
            filecast::commands::serve::run(&root, config, port, host, debounce_ms).await?;
        }
        Commands::Tree => {
            filecast::commands::tree::run(&root, &config).await?;
        }
        Commands::Watch { debounce_ms } => {
            filecast::commands::watch::run(&root, config, debounce_ms).await?;
        }
    }

    Ok(())
}
