//! Common types and utilities for distributed label computation
use thiserror::Error;

pub mod geometry;
pub mod job_config;
pub mod label_stack;
pub mod substack;

pub use geometry::{Axis, AxisSet, BoundingBox};
pub use job_config::{
    MaxBodyRecord, MergeListFile, SegmentationJobConfig, StitchJobConfig, WriteJobConfig,
};
pub use label_stack::{decode_le, encode_le, read_raw, write_raw, LabelArray};
pub use substack::{AdjacencyPair, LocalMergeProposal, Substack};

/// Pipeline errors
#[derive(Debug, Error)]
pub enum LabelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Partition error: {0}")]
    Partition(String),

    #[error("{stage} stage: {} job(s) failed: {}", .failures.len(), .failures.join(", "))]
    JobDispatch { stage: String, failures: Vec<String> },

    #[error("Store busy: {0}")]
    TransientWrite(String),

    #[error("Write failed: {0}")]
    TerminalWrite(String),

    #[error("Merge resolution error: {0}")]
    MergeResolution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for label pipeline operations
pub type Result<T> = std::result::Result<T, LabelError>;

/// Read and parse a JSON document from disk
pub fn read_json<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Write a value as pretty-printed JSON
pub fn write_json<T: serde::Serialize>(path: &std::path::Path, value: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(value)?;
    std::fs::write(path, contents)?;
    Ok(())
}
