//! calclabels - pipeline driver
//!
//! Runs one labeling session from `<session>/config.json`, dispatching jobs
//! as local (or ssh-launched) processes.

use anyhow::{Context as _, Result};
use calclabels_orchestrator::{
    HttpStatusNotifier, JobOrchestrator, JobScheduler, LocalProcessScheduler, LogNotifier,
    PipelineConfig, RemoteShell, StatusNotifier,
};
use calclabels_storage::DvidVolumeStore;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "calclabels",
    version,
    about = "Distributed segmentation: partition, segment, stitch and commit a label volume"
)]
struct Cli {
    /// Session directory holding config.json and the classifier files
    session: PathBuf,

    /// Continue from the session's checkpoint instead of starting over
    #[arg(long)]
    resume: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let config = PipelineConfig::load(&cli.session)
        .with_context(|| format!("Failed to load session {}", cli.session.display()))?;
    info!(
        "Session {}: {} into {} (job size {}, overlap {}, stitch mode {})",
        cli.session.display(),
        config.bbox,
        config.label_name,
        config.job_size,
        config.overlap_size,
        config.stitch_mode
    );

    let scheduler: Box<dyn JobScheduler> = match &config.orchestration.remote_host {
        Some(host) => Box::new(LocalProcessScheduler::with_remote(RemoteShell {
            host: host.clone(),
            env: config.orchestration.remote_env.clone(),
        })),
        None => Box::new(LocalProcessScheduler::new()),
    };
    let notifier: Box<dyn StatusNotifier> = match &config.result_callback {
        Some(url) => Box::new(HttpStatusNotifier::new(url)?),
        None => Box::new(LogNotifier),
    };
    let store = Box::new(
        DvidVolumeStore::new(&config.dvid_server, &config.uuid, &config.label_name)
            .context("Failed to set up volume store client")?,
    );

    let mut orchestrator = if cli.resume {
        JobOrchestrator::resume(config, &cli.session, scheduler, notifier, store)?
    } else {
        JobOrchestrator::new(config, &cli.session, scheduler, notifier, store)
    };
    orchestrator.run().await?;
    Ok(())
}
