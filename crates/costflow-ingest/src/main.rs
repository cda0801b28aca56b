//! Costflow - main entry point

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use costflow_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use costflow_ingest::billing::http::HttpBillingClient;
use costflow_ingest::cache::SnapshotCache;
use costflow_ingest::storage::S3Storage;
use costflow_ingest::{Cli, Commands, Config, Dispatcher, Overrides, Pipeline};
use std::process;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("costflow")
        .build();

    // LOG_* variables take precedence over the flags
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The job still runs if logging cannot be set up
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            None
        }
    };

    if let Err(e) = execute(&cli).await {
        error!(error = %format!("{:#}", e), "Job failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn execute(cli: &Cli) -> anyhow::Result<()> {
    let config = Config::load()?.apply(&Overrides::from(&cli.overrides))?;
    config.validate()?;

    let storage = S3Storage::new(config.storage.clone())
        .await
        .context("Failed to initialize object storage")?;
    let billing = HttpBillingClient::new(config.billing.clone())?;
    let cache = SnapshotCache::new(Arc::new(storage), Arc::new(billing));

    let outputs = config.outputs.clone();
    let pipeline = Arc::new(Pipeline::new(config, cache, Utc::now()));

    match cli.resolved_command() {
        Commands::Run => {
            let dispatcher = Dispatcher::with_defaults(Arc::clone(&pipeline));
            dispatcher.run(&outputs).await?;
            info!(destinations = ?outputs, "Job complete");
        }
        Commands::Fetch => {
            let summary = pipeline.prepare().await?;
            info!(
                reused = summary.reused,
                fetched = summary.fetched,
                "Snapshots refreshed"
            );
        }
    }

    Ok(())
}
