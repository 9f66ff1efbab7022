//! Volume store access and the commit stage
//!
//! - **VolumeStore**: narrow contract for writing raw label subvolumes
//! - **DvidVolumeStore**: HTTP implementation against a DVID label instance
//! - **CommitWriter**: crops, offsets and remaps a substack, then writes it
//!   with retry on store backpressure and records the outcome

use thiserror::Error;

pub mod commit_writer;
pub mod dvid;
pub mod outcome;
pub mod volume_store;

pub use commit_writer::{apply_offset, commit_job, relabel_core, CommitWriter, RetryPolicy};
pub use dvid::DvidVolumeStore;
pub use outcome::{WriteOutcome, WriteStatus};
pub use volume_store::{VolumeStore, WriteOptions};

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
