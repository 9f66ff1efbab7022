//! Pipeline orchestration
//!
//! Coordinates one labeling session: partitions the volume, dispatches
//! segmentation, stitch and write jobs to an external scheduler in throttled
//! batches, resolves the merge proposals and reports progress to the caller.

pub mod config;
pub mod notifier;
pub mod pipeline;
pub mod scheduler;
pub mod state;

pub use config::{optional_resource, OrchestrationConfig, PipelineConfig, CONFIG_FILE};
pub use notifier::{HttpStatusNotifier, LogNotifier, PipelineStatus, StatusNotifier};
pub use pipeline::{
    JobOrchestrator, MAX_BODY_FILE, REMAP_FILE, SEGMENT_CONFIG, WRITE_CONFIG, WRITE_OUTCOME,
};
pub use scheduler::{JobHandle, JobScheduler, JobSpec, JobStatus, LocalProcessScheduler, RemoteShell};
pub use state::{PipelineState, Stage, STATE_FILE};
