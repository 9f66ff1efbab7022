//! Pipeline stages and the resumable checkpoint

use calclabels_common::{read_json, write_json, AdjacencyPair, LabelError, Result, Substack};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// File name of the checkpoint inside the session directory
pub const STATE_FILE: &str = "pipeline_state.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Partition,
    Segment,
    Stitch,
    Resolve,
    Write,
    Done,
    /// Terminal; `during` is the stage that failed and the one a resume restarts
    Failed { during: Box<Stage>, reason: String },
}

impl Stage {
    /// Stage that follows a successful one
    #[must_use]
    pub fn next(&self) -> Stage {
        match self {
            Self::Partition => Self::Segment,
            Self::Segment => Self::Stitch,
            Self::Stitch => Self::Resolve,
            Self::Resolve => Self::Write,
            Self::Write | Self::Done => Self::Done,
            Self::Failed { .. } => self.clone(),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Partition => write!(f, "Partition"),
            Self::Segment => write!(f, "Segment"),
            Self::Stitch => write!(f, "Stitch"),
            Self::Resolve => write!(f, "Resolve"),
            Self::Write => write!(f, "Write"),
            Self::Done => write!(f, "Done"),
            Self::Failed { during, .. } => write!(f, "Failed during {during}"),
        }
    }
}

/// Everything a resumed run needs from earlier stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    /// Next stage to run, or the terminal state reached
    pub stage: Stage,
    pub substacks: Vec<Substack>,
    pub pairs: Vec<AdjacencyPair>,
    pub remap: Option<PathBuf>,
    /// Substacks whose write job did not succeed
    pub write_failures: Vec<usize>,
    pub updated_at: DateTime<Utc>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            stage: Stage::Partition,
            substacks: Vec::new(),
            pairs: Vec::new(),
            remap: None,
            write_failures: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

impl PipelineState {
    /// Load a checkpoint, rewinding a failed run to the stage that failed
    pub fn load_for_resume(session: &Path) -> Result<Self> {
        let path = session.join(STATE_FILE);
        if !path.is_file() {
            return Err(LabelError::Config(format!(
                "no checkpoint at {}",
                path.display()
            )));
        }
        let mut state: Self = read_json(&path)?;
        if let Stage::Failed { during, .. } = &state.stage {
            state.stage = (**during).clone();
        }
        Ok(state)
    }

    pub fn save(&mut self, session: &Path) -> Result<()> {
        self.updated_at = Utc::now();
        write_json(&session.join(STATE_FILE), self)
    }
}
