//! commit-labels - write job payload
//!
//! Relabels one substack's core region with its id offset and the global
//! remap, writes it to the DVID label instance and records the outcome.

use anyhow::{Context as _, Result};
use calclabels_common::{read_json, WriteJobConfig};
use calclabels_storage::{commit_job, DvidVolumeStore, WriteOutcome};
use clap::Parser;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(
    name = "commit-labels",
    version,
    about = "Write a relabeled substack to the volume store"
)]
struct Cli {
    /// Write job config written by the orchestrator
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config: WriteJobConfig = read_json(&cli.config)
        .with_context(|| format!("Failed to read write config {}", cli.config.display()))?;

    let outcome = match DvidVolumeStore::from_location(&config.write_location) {
        Ok(store) => commit_job(store, &config).await,
        Err(e) => WriteOutcome::not_attempted(config.region, e.to_string()),
    };
    outcome
        .save(&config.outcome)
        .with_context(|| format!("Failed to record outcome {}", config.outcome.display()))?;
    outcome.into_result()?;
    Ok(())
}
