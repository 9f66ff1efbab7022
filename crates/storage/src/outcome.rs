//! Per-substack write outcome sidecar

use calclabels_common::{BoundingBox, LabelError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStatus {
    Succeeded,
    /// Store stayed busy past the retry cap
    Busy,
    Failed,
}

/// Result of committing one substack, persisted for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteOutcome {
    /// Core region that was written
    pub region: BoundingBox,
    pub status: WriteStatus,
    /// Number of requests sent, including the last one
    pub attempts: u32,
    /// Last HTTP status seen, if any request got an answer
    pub http_status: Option<u16>,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl WriteOutcome {
    /// Failed outcome for a write that never reached the store
    #[must_use]
    pub fn not_attempted(region: BoundingBox, error: impl Into<String>) -> Self {
        Self {
            region,
            status: WriteStatus::Failed,
            attempts: 0,
            http_status: None,
            error: Some(error.into()),
            finished_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == WriteStatus::Succeeded
    }

    /// Map a failed outcome onto the pipeline error taxonomy
    pub fn into_result(self) -> calclabels_common::Result<()> {
        let detail = || {
            format!(
                "{} after {} attempt(s): {}",
                self.region,
                self.attempts,
                self.error.clone().unwrap_or_default()
            )
        };
        match self.status {
            WriteStatus::Succeeded => Ok(()),
            WriteStatus::Busy => Err(LabelError::TransientWrite(detail())),
            WriteStatus::Failed => Err(LabelError::TerminalWrite(detail())),
        }
    }

    pub fn save(&self, path: &Path) -> calclabels_common::Result<()> {
        calclabels_common::write_json(path, self)
    }

    pub fn load(path: &Path) -> calclabels_common::Result<Self> {
        calclabels_common::read_json(path)
    }
}
