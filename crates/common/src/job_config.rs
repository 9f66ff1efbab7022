//! Per-job configuration artifacts written by the orchestrator and read by job payloads

use crate::geometry::{AxisSet, BoundingBox};
use crate::substack::LocalMergeProposal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Input for one segmentation job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SegmentationJobConfig {
    /// Grayscale source the job reads from
    pub datasrc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agglomclassifier: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synapses: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roi: Option<String>,
    /// Core region (`bbox1`/`bbox2`)
    #[serde(flatten)]
    pub region: BoundingBox,
    pub border: i64,
    /// Where the job writes its halo-expanded label stack
    pub labels: PathBuf,
    /// Where the job writes its [`MaxBodyRecord`]
    pub max_body: PathBuf,
}

/// Input for one stitch job between two face-adjacent substacks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StitchJobConfig {
    pub owner: usize,
    /// Neighbor substack id
    pub id: usize,
    /// Halo-expanded region of the owner's label stack
    pub bbox: BoundingBox,
    /// Halo-expanded region of the neighbor's label stack
    pub bbox_2: BoundingBox,
    pub labels: PathBuf,
    pub labels_2: PathBuf,
    pub overlap_axis: AxisSet,
    pub stitching_mode: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_overlap: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liberal_min_overlap: Option<u64>,
    /// Where the job writes its [`MergeListFile`]
    pub output: PathBuf,
}

/// Input for one relabel-and-write job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WriteJobConfig {
    pub offset: u64,
    /// Core region (`bbox1`/`bbox2`)
    #[serde(flatten)]
    pub region: BoundingBox,
    pub border: i64,
    /// Halo-expanded label stack produced by segmentation
    pub labels: PathBuf,
    /// Global remap table shared by all write jobs
    pub remap: PathBuf,
    /// Label instance endpoint, e.g. `http://host/api/node/<uuid>/<label-name>`
    pub write_location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roi: Option<String>,
    #[serde(default = "default_true")]
    pub throttle: bool,
    pub retry_delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Sidecar file recording the write outcome
    pub outcome: PathBuf,
}

fn default_true() -> bool {
    true
}

/// Segmentation output metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxBodyRecord {
    pub max_id: u64,
}

/// Stitch output: merges between the owner's and neighbor's local bodies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeListFile {
    pub owner: usize,
    /// Neighbor substack id
    pub id: usize,
    pub merge_list: Vec<[u64; 2]>,
}

impl From<MergeListFile> for LocalMergeProposal {
    fn from(file: MergeListFile) -> Self {
        LocalMergeProposal {
            owner: file.owner,
            neighbor: file.id,
            merges: file.merge_list,
        }
    }
}
