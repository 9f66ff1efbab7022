//! Job scheduler contract and a local process implementation

use calclabels_common::{LabelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// One unit of work for the external scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Work item label used in logs and failure reports
    pub name: String,
    pub executable: String,
    pub args: Vec<String>,
    /// Resource hint: processor slots the job needs
    pub slots: u32,
}

/// Opaque handle returned by [`JobScheduler::submit`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub String);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal state of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Succeeded,
    Failed { code: Option<i32> },
    TimedOut,
    /// The scheduler refused the submission
    Rejected { reason: String },
    /// The scheduler no longer knows the handle
    Lost,
}

impl JobStatus {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl From<ExitStatus> for JobStatus {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            Self::Succeeded
        } else {
            Self::Failed {
                code: status.code(),
            }
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed { code: Some(code) } => write!(f, "exit code {code}"),
            Self::Failed { code: None } => write!(f, "killed by signal"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Rejected { reason } => write!(f, "rejected: {reason}"),
            Self::Lost => write!(f, "lost"),
        }
    }
}

/// External cluster scheduler
#[async_trait::async_trait]
pub trait JobScheduler: Send + Sync {
    /// Queue a job; an error means the scheduler refused it
    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle>;

    /// Block until every handle is terminal, in the order given
    ///
    /// Jobs still running after `timeout` are killed and reported `TimedOut`.
    async fn wait(&self, handles: &[JobHandle], timeout: Option<Duration>) -> Result<Vec<JobStatus>>;
}

/// Run jobs on a remote host through `ssh`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteShell {
    /// `user@host` or an ssh config alias
    pub host: String,
    /// Variables exported from this process into the remote command
    pub env: Vec<String>,
}

/// Runs each job as a child process of the orchestrator
#[derive(Debug, Default)]
pub struct LocalProcessScheduler {
    remote: Option<RemoteShell>,
    running: Mutex<HashMap<JobHandle, Child>>,
}

impl LocalProcessScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_remote(remote: RemoteShell) -> Self {
        Self {
            remote: Some(remote),
            running: Mutex::new(HashMap::new()),
        }
    }

    fn command(&self, spec: &JobSpec) -> Command {
        match &self.remote {
            None => {
                let mut command = Command::new(&spec.executable);
                command.args(&spec.args);
                command
            }
            Some(remote) => {
                let mut line = String::new();
                for name in &remote.env {
                    if let Ok(value) = std::env::var(name) {
                        line.push_str(&format!("export {name}={}; ", shell_quote(&value)));
                    }
                }
                line.push_str(&shell_quote(&spec.executable));
                for arg in &spec.args {
                    line.push(' ');
                    line.push_str(&shell_quote(arg));
                }
                let mut command = Command::new("ssh");
                command.arg(&remote.host).arg(line);
                command
            }
        }
    }
}

/// Single-quote a word for a POSIX shell
fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

#[async_trait::async_trait]
impl JobScheduler for LocalProcessScheduler {
    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle> {
        let child = self
            .command(spec)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LabelError::Other(format!("cannot start {}: {e}", spec.executable)))?;

        let handle = JobHandle(format!("{}-{}", spec.name, uuid::Uuid::new_v4()));
        debug!("Started {} as {}", spec.executable, handle);
        self.running.lock().await.insert(handle.clone(), child);
        Ok(handle)
    }

    async fn wait(&self, handles: &[JobHandle], timeout: Option<Duration>) -> Result<Vec<JobStatus>> {
        let mut statuses = vec![JobStatus::Lost; handles.len()];
        let mut waits = JoinSet::new();
        {
            let mut running = self.running.lock().await;
            for (i, handle) in handles.iter().enumerate() {
                let Some(mut child) = running.remove(handle) else {
                    warn!("Unknown job handle {}", handle);
                    continue;
                };
                waits.spawn(async move {
                    let status = match timeout {
                        None => child.wait().await.map(JobStatus::from),
                        Some(limit) => {
                            let waited = tokio::time::timeout(limit, child.wait()).await;
                            match waited {
                                Ok(result) => result.map(JobStatus::from),
                                Err(_) => {
                                    let _ = child.kill().await;
                                    Ok(JobStatus::TimedOut)
                                }
                            }
                        }
                    };
                    (i, status)
                });
            }
        }

        while let Some(joined) = waits.join_next().await {
            let (i, status) =
                joined.map_err(|e| LabelError::Other(format!("job waiter panicked: {e}")))?;
            statuses[i] = status?;
        }
        Ok(statuses)
    }
}
