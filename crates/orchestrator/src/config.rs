//! Session configuration: `<session>/config.json`

use calclabels_common::{BoundingBox, LabelError, Result};
use calclabels_stitch::{StitchMode, StitchParams};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the session configuration
pub const CONFIG_FILE: &str = "config.json";

/// One labeling request, as posted by the calling service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PipelineConfig {
    /// Endpoint receiving status updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_callback: Option<String>,
    #[serde(default = "default_job_size")]
    pub job_size: u64,
    /// Total overlap between neighboring substacks; each gets half as halo
    #[serde(default = "default_overlap_size")]
    pub overlap_size: u64,
    pub uuid: String,
    pub dvid_server: String,
    pub label_name: String,
    /// Volume to label (`bbox1`/`bbox2`)
    #[serde(flatten)]
    pub bbox: BoundingBox,
    #[serde(default = "default_stitch_mode")]
    pub stitch_mode: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roi: Option<String>,
    /// Synapse file name inside the session directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synapses: Option<String>,
    /// Pixel classifier file name inside the session directory
    #[serde(default = "default_classifier")]
    pub classifier: String,
    /// Agglomeration classifier file name inside the session directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agglomclassifier: Option<String>,
    /// Pre-computed core regions; replaces the regular grid over `bbox`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substacks: Option<Vec<BoundingBox>>,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
}

fn default_job_size() -> u64 {
    500
}

fn default_overlap_size() -> u64 {
    40
}

fn default_stitch_mode() -> u8 {
    2
}

fn default_classifier() -> String {
    "classifier.ilp".to_string()
}

/// Tunables for dispatch and the job payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct OrchestrationConfig {
    pub watershed_exe: String,
    pub stitch_exe: String,
    pub commit_exe: String,
    /// Raw label stack written by segmentation inside each substack directory
    pub labels_file: String,
    pub segment_slots: u32,
    pub stitch_slots: u32,
    pub write_slots: u32,
    /// Jobs outstanding at once
    pub batch_size: usize,
    pub submit_delay_ms: u64,
    pub job_timeout_secs: Option<u64>,
    /// Resubmissions of a failed job before its stage fails
    pub job_retries: u32,
    pub write_retry_delay_ms: u64,
    /// `None` keeps retrying a busy store
    pub write_max_retries: Option<u32>,
    pub throttle: bool,
    pub min_overlap: Option<u64>,
    pub purity: Option<f64>,
    pub liberal_min_overlap: Option<u64>,
    /// Run jobs on this host over ssh instead of locally
    pub remote_host: Option<String>,
    /// Environment variables exported to remote jobs
    pub remote_env: Vec<String>,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            watershed_exe: "gala-watershed".to_string(),
            stitch_exe: "stitch-labels".to_string(),
            commit_exe: "commit-labels".to_string(),
            labels_file: "supervoxels.bin".to_string(),
            segment_slots: 16,
            stitch_slots: 1,
            write_slots: 1,
            batch_size: 50,
            submit_delay_ms: 1000,
            job_timeout_secs: None,
            job_retries: 0,
            write_retry_delay_ms: 5000,
            write_max_retries: None,
            throttle: true,
            min_overlap: None,
            purity: None,
            liberal_min_overlap: None,
            remote_host: None,
            remote_env: Vec::new(),
        }
    }
}

impl OrchestrationConfig {
    #[must_use]
    pub fn submit_delay(&self) -> Duration {
        Duration::from_millis(self.submit_delay_ms)
    }

    #[must_use]
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }

    /// Stitch thresholds with per-session overrides applied
    #[must_use]
    pub fn stitch_params(&self) -> StitchParams {
        let defaults = StitchParams::default();
        StitchParams {
            min_overlap: self.min_overlap.unwrap_or(defaults.min_overlap),
            purity: self.purity.unwrap_or(defaults.purity),
            liberal_min_overlap: self
                .liberal_min_overlap
                .unwrap_or(defaults.liberal_min_overlap),
        }
    }
}

impl PipelineConfig {
    /// Load and validate `<session>/config.json`
    pub fn load(session: &Path) -> Result<Self> {
        let path = session.join(CONFIG_FILE);
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            LabelError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| LabelError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("uuid", &self.uuid),
            ("dvid-server", &self.dvid_server),
            ("label-name", &self.label_name),
        ] {
            if value.trim().is_empty() {
                return Err(LabelError::Config(format!("{field} must not be empty")));
            }
        }
        if self.job_size == 0 {
            return Err(LabelError::Config("job-size must be positive".to_string()));
        }
        if self.orchestration.batch_size == 0 {
            return Err(LabelError::Config("batch-size must be positive".to_string()));
        }
        self.stitch_mode()?;
        let purity = self.orchestration.stitch_params().purity;
        if !(0.0..=1.0).contains(&purity) {
            return Err(LabelError::Config(format!(
                "purity must be within [0, 1], got {purity}"
            )));
        }
        if self.substacks.is_none() && self.bbox.is_degenerate() {
            return Err(LabelError::Config(format!(
                "bounding box {} has zero extent",
                self.bbox
            )));
        }
        Ok(())
    }

    pub fn stitch_mode(&self) -> Result<StitchMode> {
        StitchMode::try_from(self.stitch_mode)
    }

    /// Grayscale source handed to segmentation jobs
    #[must_use]
    pub fn datasrc(&self) -> String {
        format!(
            "{}/api/node/{}/grayscale",
            self.dvid_server.trim_end_matches('/'),
            self.uuid
        )
    }
}

/// Path of an optional session resource, if the file exists
#[must_use]
pub fn optional_resource(session: &Path, name: Option<&str>) -> Option<PathBuf> {
    let path = session.join(name?);
    path.is_file().then_some(path)
}
