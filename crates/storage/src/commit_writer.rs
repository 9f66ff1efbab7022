//! Relabel a substack's core region and commit it to the volume store

use crate::{VolumeStore, WriteOptions, WriteOutcome, WriteStatus};
use calclabels_common::{
    encode_le, read_raw, Axis, BoundingBox, LabelArray, LabelError, Result, WriteJobConfig,
};
use calclabels_merge::GlobalRemap;
use chrono::Utc;
use ndarray::s;
use std::time::Duration;
use tracing::{error, info, warn};

const STATUS_OK: u16 = 200;
const STATUS_BUSY: u16 = 503;

/// Shift a local label into global space; background stays `0`
#[must_use]
pub fn apply_offset(label: u64, offset: u64) -> u64 {
    let shifted = label + offset;
    if shifted == offset {
        0
    } else {
        shifted
    }
}

/// Crop the halo from `labels`, then offset and remap every voxel of the core
///
/// `labels` covers `region` grown by `border`.
pub fn relabel_core(
    labels: &LabelArray,
    region: &BoundingBox,
    border: i64,
    offset: u64,
    remap: &GlobalRemap,
) -> Result<LabelArray> {
    let halo = region.expand(border);
    if labels.dim() != halo.shape() {
        return Err(LabelError::Other(format!(
            "label stack shape {:?} does not match halo region {} (expected {:?})",
            labels.dim(),
            halo,
            halo.shape()
        )));
    }
    let core = labels.slice(s![
        halo.local_range(region, Axis::Z),
        halo.local_range(region, Axis::Y),
        halo.local_range(region, Axis::X)
    ]);
    Ok(core.mapv(|label| match apply_offset(label, offset) {
        0 => 0,
        global => remap.resolve(global),
    }))
}

/// How long to keep retrying a busy store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// `None` retries for as long as the store answers busy
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_retries: None,
        }
    }
}

/// Writes relabeled substacks into one label instance
pub struct CommitWriter<S> {
    store: S,
    policy: RetryPolicy,
    options: WriteOptions,
}

impl<S: VolumeStore> CommitWriter<S> {
    pub fn new(store: S, policy: RetryPolicy, options: WriteOptions) -> Self {
        Self {
            store,
            policy,
            options,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Relabel and write one substack
    ///
    /// Only malformed input is an error; store failures come back as a recorded outcome.
    pub async fn write_substack(
        &self,
        labels: &LabelArray,
        region: &BoundingBox,
        border: i64,
        offset: u64,
        remap: &GlobalRemap,
    ) -> Result<WriteOutcome> {
        let core = relabel_core(labels, region, border, offset, remap)?;
        let body = encode_le(core.view());
        Ok(self.commit(region, &body).await)
    }

    /// Post an encoded core region, retrying while the store answers busy
    pub async fn commit(&self, region: &BoundingBox, body: &[u8]) -> WriteOutcome {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let (status, http_status, error) =
                match self.store.write_raw(region, &self.options, body).await {
                    Ok(STATUS_OK) => (WriteStatus::Succeeded, Some(STATUS_OK), None),
                    Ok(STATUS_BUSY) => {
                        let retries = attempts - 1;
                        if self.policy.max_retries.is_some_and(|cap| retries >= cap) {
                            (
                                WriteStatus::Busy,
                                Some(STATUS_BUSY),
                                Some(format!("store still busy after {retries} retries")),
                            )
                        } else {
                            warn!(
                                "Store busy writing {}, retrying in {:?} (attempt {})",
                                region, self.policy.delay, attempts
                            );
                            tokio::time::sleep(self.policy.delay).await;
                            continue;
                        }
                    }
                    Ok(code) => (
                        WriteStatus::Failed,
                        Some(code),
                        Some(format!("store answered {code}")),
                    ),
                    Err(e) => (WriteStatus::Failed, None, Some(e.to_string())),
                };

            match status {
                WriteStatus::Succeeded => {
                    info!("Wrote {} ({} bytes, {} attempt(s))", region, body.len(), attempts);
                }
                _ => error!(
                    "Write of {} failed after {} attempt(s): {}",
                    region,
                    attempts,
                    error.as_deref().unwrap_or("unknown")
                ),
            }

            return WriteOutcome {
                region: *region,
                status,
                attempts,
                http_status,
                error,
                finished_at: Utc::now(),
            };
        }
    }
}

/// Run one write job from its config
///
/// Unreadable inputs come back as a failed outcome, like store failures, so
/// every job leaves a sidecar behind.
pub async fn commit_job<S: VolumeStore>(store: S, config: &WriteJobConfig) -> WriteOutcome {
    match try_commit_job(store, config).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Write of {} not attempted: {}", config.region, e);
            WriteOutcome::not_attempted(config.region, e.to_string())
        }
    }
}

async fn try_commit_job<S: VolumeStore>(store: S, config: &WriteJobConfig) -> Result<WriteOutcome> {
    let remap = GlobalRemap::load(&config.remap)?;
    let halo = config.region.expand(config.border);
    let labels = read_raw(&config.labels, halo.shape())?;
    let writer = CommitWriter::new(
        store,
        RetryPolicy {
            delay: Duration::from_millis(config.retry_delay_ms),
            max_retries: config.max_retries,
        },
        WriteOptions {
            throttle: config.throttle,
            roi: config.roi.clone(),
        },
    );
    writer
        .write_substack(&labels, &config.region, config.border, config.offset, &remap)
        .await
}
