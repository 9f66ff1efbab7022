//! stitch-labels - stitch job payload
//!
//! Reads a stitch job config, compares the two label stacks inside their
//! shared halo and writes the proposed local merges.

use anyhow::{Context as _, Result};
use calclabels_common::{read_json, read_raw, write_json, MergeListFile, StitchJobConfig};
use calclabels_stitch::{StitchEngine, StitchMode, StitchParams};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(
    name = "stitch-labels",
    version,
    about = "Propose body merges across the shared face of two substacks"
)]
struct Cli {
    /// Stitch job config written by the orchestrator
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config: StitchJobConfig = read_json(&cli.config)
        .with_context(|| format!("Failed to read stitch config {}", cli.config.display()))?;

    let defaults = StitchParams::default();
    let params = StitchParams {
        min_overlap: config.min_overlap.unwrap_or(defaults.min_overlap),
        purity: config.purity.unwrap_or(defaults.purity),
        liberal_min_overlap: config
            .liberal_min_overlap
            .unwrap_or(defaults.liberal_min_overlap),
    };
    let engine = StitchEngine::new(StitchMode::try_from(config.stitching_mode)?, params);

    let labels = read_raw(&config.labels, config.bbox.shape())
        .with_context(|| format!("Failed to read {}", config.labels.display()))?;
    let labels_2 = read_raw(&config.labels_2, config.bbox_2.shape())
        .with_context(|| format!("Failed to read {}", config.labels_2.display()))?;

    let outcome = engine.stitch(
        &labels,
        &config.bbox,
        &labels_2,
        &config.bbox_2,
        config.overlap_axis,
    )?;

    info!(
        "Substacks {} and {}: {} merges (small overlap {}, conservative {}, liberal {}, not mutual {})",
        config.owner,
        config.id,
        outcome.merges.len(),
        outcome.stats.small_overlap_prune,
        outcome.stats.conservative_prune,
        outcome.stats.liberal_add,
        outcome.stats.not_mutual
    );

    write_json(
        &config.output,
        &MergeListFile {
            owner: config.owner,
            id: config.id,
            merge_list: outcome.merges,
        },
    )?;
    Ok(())
}
