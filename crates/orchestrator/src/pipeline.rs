//! Staged job orchestration
//!
//! Runs `Partition -> Segment -> Stitch -> Resolve -> Write -> Done`. Job
//! stages submit work in bounded batches and block at a barrier until every
//! job of the batch is terminal. Failed jobs are resubmitted up to the retry
//! budget; failures that remain abort the Segment and Stitch stages, while
//! failed writes are only recorded. The state is checkpointed after every
//! stage so a run can resume where it stopped.

use crate::config::{optional_resource, PipelineConfig};
use crate::notifier::{PipelineStatus, StatusNotifier};
use crate::scheduler::{JobScheduler, JobSpec, JobStatus};
use crate::state::{PipelineState, Stage};
use calclabels_common::{
    read_json, write_json, LabelError, MaxBodyRecord, MergeListFile, Result,
    SegmentationJobConfig, StitchJobConfig, Substack, WriteJobConfig,
};
use calclabels_merge::MergeResolver;
use calclabels_partition::{AdjacencyGraph, Partitioner, SubstackSource};
use calclabels_storage::{VolumeStore, WriteOutcome};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Segmentation job config inside a substack directory
pub const SEGMENT_CONFIG: &str = "config.json";
/// Largest local body id reported by segmentation
pub const MAX_BODY_FILE: &str = "max_body.json";
/// Write job config inside a substack directory
pub const WRITE_CONFIG: &str = "configw.json";
/// Write outcome sidecar inside a substack directory
pub const WRITE_OUTCOME: &str = "write_outcome.json";
/// Global remap inside the session directory
pub const REMAP_FILE: &str = "remap.json";

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Drives one labeling session through all stages
pub struct JobOrchestrator {
    config: PipelineConfig,
    session: PathBuf,
    scheduler: Box<dyn JobScheduler>,
    notifier: Box<dyn StatusNotifier>,
    store: Box<dyn VolumeStore>,
    state: PipelineState,
}

impl JobOrchestrator {
    /// Start a fresh run in `session`
    pub fn new(
        config: PipelineConfig,
        session: impl Into<PathBuf>,
        scheduler: Box<dyn JobScheduler>,
        notifier: Box<dyn StatusNotifier>,
        store: Box<dyn VolumeStore>,
    ) -> Self {
        Self {
            config,
            session: session.into(),
            scheduler,
            notifier,
            store,
            state: PipelineState::default(),
        }
    }

    /// Continue from the checkpoint in `session`
    pub fn resume(
        config: PipelineConfig,
        session: impl Into<PathBuf>,
        scheduler: Box<dyn JobScheduler>,
        notifier: Box<dyn StatusNotifier>,
        store: Box<dyn VolumeStore>,
    ) -> Result<Self> {
        let session = session.into();
        let state = PipelineState::load_for_resume(&session)?;
        info!("Resuming session {} at {} stage", session.display(), state.stage);
        Ok(Self {
            config,
            session,
            scheduler,
            notifier,
            store,
            state,
        })
    }

    #[must_use]
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    #[must_use]
    pub fn stage(&self) -> &Stage {
        &self.state.stage
    }

    /// Run every remaining stage
    pub async fn run(&mut self) -> Result<()> {
        if self.state.stage == Stage::Partition {
            self.report(PipelineStatus::Started).await;
        }

        while !self.state.stage.is_terminal() {
            let stage = self.state.stage.clone();
            info!("Entering {} stage", stage);
            let result = match stage {
                Stage::Partition => self.partition(),
                Stage::Segment => self.segment().await,
                Stage::Stitch => self.stitch().await,
                Stage::Resolve => self.resolve(),
                Stage::Write => self.write().await,
                Stage::Done | Stage::Failed { .. } => break,
            };
            let result = result.and_then(|()| {
                self.state.stage = stage.next();
                self.state.save(&self.session)
            });

            if let Err(e) = result {
                error!("{} stage failed: {}", stage, e);
                self.state.stage = Stage::Failed {
                    during: Box::new(stage),
                    reason: e.to_string(),
                };
                if let Err(save_err) = self.state.save(&self.session) {
                    warn!("Failed to checkpoint failed run: {}", save_err);
                }
                self.report(PipelineStatus::Failed(e.to_string())).await;
                return Err(e);
            }

            match stage {
                Stage::Segment => self.report(PipelineStatus::GeneratedInitialLabels).await,
                Stage::Stitch => self.report(PipelineStatus::StitchedLabels).await,
                Stage::Write => self.report(PipelineStatus::WroteLabels).await,
                _ => {}
            }
        }

        info!("Session {} finished", self.session.display());
        self.report(PipelineStatus::Finished).await;
        Ok(())
    }

    async fn report(&self, status: PipelineStatus) {
        if let Err(e) = self.notifier.notify(&status).await {
            warn!("Status callback for '{}' failed: {}", status.label(), e);
        }
    }

    fn substack(&self, id: usize) -> Result<&Substack> {
        self.state
            .substacks
            .get(id)
            .filter(|substack| substack.id == id)
            .ok_or_else(|| LabelError::Other(format!("unknown substack {id}")))
    }

    fn partition(&mut self) -> Result<()> {
        let partitioner = Partitioner::new(self.config.job_size, self.config.overlap_size)?;
        let source = match &self.config.substacks {
            Some(regions) => SubstackSource::Explicit(regions.clone()),
            None => SubstackSource::Grid(self.config.bbox),
        };
        let mut substacks = partitioner.partition(&source)?;
        for substack in &mut substacks {
            substack.assign_work_dir(&self.session);
            std::fs::create_dir_all(&substack.work_dir)?;
        }
        self.state.substacks = substacks;
        Ok(())
    }

    async fn segment(&mut self) -> Result<()> {
        let orchestration = &self.config.orchestration;
        let classifier = optional_resource(&self.session, Some(&self.config.classifier));
        if classifier.is_none() {
            warn!(
                "Classifier {} not found in session, segmentation runs without it",
                self.config.classifier
            );
        }
        let agglomclassifier =
            optional_resource(&self.session, self.config.agglomclassifier.as_deref());
        let synapses = optional_resource(&self.session, self.config.synapses.as_deref());

        let mut jobs = Vec::with_capacity(self.state.substacks.len());
        for substack in &self.state.substacks {
            let job_config = SegmentationJobConfig {
                datasrc: self.config.datasrc(),
                classifier: classifier.clone(),
                agglomclassifier: agglomclassifier.clone(),
                synapses: synapses.clone(),
                roi: self.config.roi.clone(),
                region: substack.region,
                border: substack.border,
                labels: substack.work_file(&orchestration.labels_file),
                max_body: substack.work_file(MAX_BODY_FILE),
            };
            let config_path = substack.work_file(SEGMENT_CONFIG);
            write_json(&config_path, &job_config)?;
            jobs.push(JobSpec {
                name: format!("segment-{}", substack.id),
                executable: orchestration.watershed_exe.clone(),
                args: vec![
                    path_arg(&substack.work_dir),
                    "--config-file".to_string(),
                    path_arg(&config_path),
                ],
                slots: orchestration.segment_slots,
            });
        }

        let failures = self.dispatch(&jobs).await?;
        check_barrier(&Stage::Segment, &jobs, failures)
    }

    /// Config and output paths of each pair's stitch job, numbered per owner
    fn stitch_files(&self) -> Result<Vec<(PathBuf, PathBuf)>> {
        let mut per_owner = vec![0usize; self.state.substacks.len()];
        let mut files = Vec::with_capacity(self.state.pairs.len());
        for pair in &self.state.pairs {
            let owner = self.substack(pair.owner)?;
            let n = per_owner[owner.id];
            per_owner[owner.id] += 1;
            files.push((
                owner.work_file(&format!("config_stitch{n}.json")),
                owner.work_file(&format!("merge_{n}.json")),
            ));
        }
        Ok(files)
    }

    async fn stitch(&mut self) -> Result<()> {
        let graph = AdjacencyGraph::build(&self.state.substacks);
        graph.record_stitch_counts(&mut self.state.substacks);
        self.state.pairs = graph.pairs().to_vec();

        let orchestration = &self.config.orchestration;
        let params = orchestration.stitch_params();
        let files = self.stitch_files()?;
        let mut jobs = Vec::with_capacity(files.len());
        for (pair, (config_path, output)) in self.state.pairs.iter().zip(files) {
            let owner = self.substack(pair.owner)?;
            let neighbor = self.substack(pair.neighbor)?;
            let job_config = StitchJobConfig {
                owner: owner.id,
                id: neighbor.id,
                bbox: owner.halo_region(),
                bbox_2: neighbor.halo_region(),
                labels: owner.work_file(&orchestration.labels_file),
                labels_2: neighbor.work_file(&orchestration.labels_file),
                overlap_axis: pair.axes,
                stitching_mode: self.config.stitch_mode,
                min_overlap: Some(params.min_overlap),
                purity: Some(params.purity),
                liberal_min_overlap: Some(params.liberal_min_overlap),
                output,
            };
            write_json(&config_path, &job_config)?;
            jobs.push(JobSpec {
                name: format!("stitch-{}-{}", owner.id, neighbor.id),
                executable: orchestration.stitch_exe.clone(),
                args: vec![path_arg(&config_path)],
                slots: orchestration.stitch_slots,
            });
        }

        let failures = self.dispatch(&jobs).await?;
        check_barrier(&Stage::Stitch, &jobs, failures)
    }

    fn resolve(&mut self) -> Result<()> {
        let mut max_ids = Vec::with_capacity(self.state.substacks.len());
        for substack in &self.state.substacks {
            let path = substack.work_file(MAX_BODY_FILE);
            let record: MaxBodyRecord = read_json(&path).map_err(|e| {
                LabelError::MergeResolution(format!(
                    "substack {} has no max body record at {}: {e}",
                    substack.id,
                    path.display()
                ))
            })?;
            max_ids.push(record.max_id);
        }

        let mut resolver = MergeResolver::new(max_ids);
        for (substack, &offset) in self.state.substacks.iter_mut().zip(resolver.offsets()) {
            substack.id_offset = Some(offset);
        }

        let files = self.stitch_files()?;
        for (pair, (_, output)) in self.state.pairs.iter().zip(&files) {
            let merges: MergeListFile = read_json(output)?;
            if merges.owner != pair.owner || merges.id != pair.neighbor {
                return Err(LabelError::MergeResolution(format!(
                    "{} holds merges for substacks {} and {}, expected {} and {}",
                    output.display(),
                    merges.owner,
                    merges.id,
                    pair.owner,
                    pair.neighbor
                )));
            }
            resolver.add_proposal(&merges.into())?;
        }

        let remap = resolver.remap()?;
        let path = self.session.join(REMAP_FILE);
        remap.save(&path)?;
        self.state.remap = Some(path);
        Ok(())
    }

    async fn write(&mut self) -> Result<()> {
        self.store
            .create_label_instance()
            .await
            .map_err(|e| LabelError::Other(format!("cannot create label instance: {e}")))?;

        let remap = self
            .state
            .remap
            .clone()
            .ok_or_else(|| LabelError::MergeResolution("no remap has been resolved".to_string()))?;
        let orchestration = &self.config.orchestration;
        let write_location = self.store.location();

        let mut jobs = Vec::with_capacity(self.state.substacks.len());
        for substack in &self.state.substacks {
            let offset = substack.id_offset.ok_or_else(|| {
                LabelError::MergeResolution(format!("substack {} has no id offset", substack.id))
            })?;
            let job_config = WriteJobConfig {
                offset,
                region: substack.region,
                border: substack.border,
                labels: substack.work_file(&orchestration.labels_file),
                remap: remap.clone(),
                write_location: write_location.clone(),
                roi: self.config.roi.clone(),
                throttle: orchestration.throttle,
                retry_delay_ms: orchestration.write_retry_delay_ms,
                max_retries: orchestration.write_max_retries,
                outcome: substack.work_file(WRITE_OUTCOME),
            };
            let config_path = substack.work_file(WRITE_CONFIG);
            write_json(&config_path, &job_config)?;
            jobs.push(JobSpec {
                name: format!("write-{}", substack.id),
                executable: orchestration.commit_exe.clone(),
                args: vec![path_arg(&config_path)],
                slots: orchestration.write_slots,
            });
        }

        let failures = self.dispatch(&jobs).await?;
        let mut write_failures = Vec::with_capacity(failures.len());
        for (index, status) in failures {
            let substack = &self.state.substacks[index];
            let outcome_path = substack.work_file(WRITE_OUTCOME);
            match WriteOutcome::load(&outcome_path) {
                Ok(outcome) => error!(
                    "Write of substack {} failed ({}): {}",
                    substack.id,
                    status,
                    outcome.error.unwrap_or_default()
                ),
                Err(_) => error!(
                    "Write of substack {} failed ({}), no outcome recorded",
                    substack.id, status
                ),
            }
            write_failures.push(substack.id);
        }
        if !write_failures.is_empty() {
            warn!(
                "{} of {} substack writes failed; outcomes are in each substack's {}",
                write_failures.len(),
                jobs.len(),
                WRITE_OUTCOME
            );
        }
        self.state.write_failures = write_failures;
        Ok(())
    }

    /// Submit `jobs` in batches and return the index and status of every job that still failed
    async fn dispatch(&self, jobs: &[JobSpec]) -> Result<Vec<(usize, JobStatus)>> {
        let batch_size = self.config.orchestration.batch_size;
        let retries = self.config.orchestration.job_retries;
        let batches = jobs.len().div_ceil(batch_size);
        let mut failures = Vec::new();

        for (n, start) in (0..jobs.len()).step_by(batch_size).enumerate() {
            let end = (start + batch_size).min(jobs.len());
            info!("Submitting batch {}/{} ({} jobs)", n + 1, batches, end - start);

            let mut pending: Vec<usize> = (start..end).collect();
            let mut attempt = 0;
            loop {
                let statuses = self.run_batch(jobs, &pending).await?;
                let failed: Vec<(usize, JobStatus)> = pending
                    .iter()
                    .copied()
                    .zip(statuses)
                    .filter(|(_, status)| !status.is_success())
                    .collect();
                if failed.is_empty() {
                    break;
                }
                if attempt >= retries {
                    for (index, status) in &failed {
                        error!("Job {} failed: {}", jobs[*index].name, status);
                    }
                    failures.extend(failed);
                    break;
                }
                attempt += 1;
                warn!(
                    "Resubmitting {} failed job(s) (retry {}/{})",
                    failed.len(),
                    attempt,
                    retries
                );
                pending = failed.into_iter().map(|(index, _)| index).collect();
            }
        }
        Ok(failures)
    }

    /// Submit one batch with throttling and wait for all of it
    async fn run_batch(&self, jobs: &[JobSpec], batch: &[usize]) -> Result<Vec<JobStatus>> {
        let delay = self.config.orchestration.submit_delay();
        let mut statuses: Vec<Option<JobStatus>> = vec![None; batch.len()];
        let mut handles = Vec::with_capacity(batch.len());
        let mut submitted = Vec::with_capacity(batch.len());

        for (slot, &index) in batch.iter().enumerate() {
            if slot > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match self.scheduler.submit(&jobs[index]).await {
                Ok(handle) => {
                    handles.push(handle);
                    submitted.push(slot);
                }
                Err(e) => {
                    warn!("Scheduler refused {}: {}", jobs[index].name, e);
                    statuses[slot] = Some(JobStatus::Rejected {
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !handles.is_empty() {
            let waited = self
                .scheduler
                .wait(&handles, self.config.orchestration.job_timeout())
                .await?;
            if waited.len() != handles.len() {
                return Err(LabelError::Other(format!(
                    "scheduler returned {} statuses for {} jobs",
                    waited.len(),
                    handles.len()
                )));
            }
            for (slot, status) in submitted.into_iter().zip(waited) {
                statuses[slot] = Some(status);
            }
        }

        Ok(statuses
            .into_iter()
            .map(|status| status.unwrap_or(JobStatus::Lost))
            .collect())
    }
}

/// Fail the stage if any job is still failed after retries
fn check_barrier(stage: &Stage, jobs: &[JobSpec], failures: Vec<(usize, JobStatus)>) -> Result<()> {
    if failures.is_empty() {
        info!("{} stage: all {} jobs succeeded", stage, jobs.len());
        return Ok(());
    }
    Err(LabelError::JobDispatch {
        stage: stage.to_string(),
        failures: failures
            .into_iter()
            .map(|(index, status)| format!("{} ({status})", jobs[index].name))
            .collect(),
    })
}
