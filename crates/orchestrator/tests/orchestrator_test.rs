//! Orchestrator state machine against a fake in-process scheduler
//!
//! The fake scheduler "runs" each job at submission time by writing the
//! files the real payloads would produce (max body records, merge lists),
//! and returns the status chosen by the test.

use calclabels_common::{
    read_json, write_json, BoundingBox, LabelError, MaxBodyRecord, MergeListFile,
    SegmentationJobConfig, StitchJobConfig,
};
use calclabels_merge::GlobalRemap;
use calclabels_orchestrator::*;
use calclabels_storage::{StorageResult, VolumeStore, WriteOptions};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Outcome = std::result::Result<JobStatus, String>;

/// Decides the fate of a job from its name and how often it was submitted before
type Policy = Arc<dyn Fn(&str, usize) -> Outcome + Send + Sync>;

#[derive(Default)]
struct Recorder {
    submitted: Vec<String>,
    statuses: HashMap<JobHandle, JobStatus>,
    max_wait_batch: usize,
}

#[derive(Clone)]
struct FakeScheduler {
    policy: Policy,
    recorder: Arc<Mutex<Recorder>>,
}

impl FakeScheduler {
    fn new(policy: impl Fn(&str, usize) -> Outcome + Send + Sync + 'static) -> Self {
        Self {
            policy: Arc::new(policy),
            recorder: Arc::new(Mutex::new(Recorder::default())),
        }
    }

    fn succeeding() -> Self {
        Self::new(|_, _| Ok(JobStatus::Succeeded))
    }

    fn submitted(&self) -> Vec<String> {
        self.recorder.lock().unwrap().submitted.clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.submitted()
            .iter()
            .filter(|name| name.starts_with(prefix))
            .count()
    }
}

/// Produce what the real payload would leave behind
fn simulate(spec: &JobSpec) {
    if spec.name.starts_with("segment-") {
        let config: SegmentationJobConfig = read_json(Path::new(&spec.args[2])).unwrap();
        write_json(&config.max_body, &MaxBodyRecord { max_id: 5 }).unwrap();
    } else if spec.name.starts_with("stitch-") {
        let config: StitchJobConfig = read_json(Path::new(&spec.args[0])).unwrap();
        let merges = MergeListFile {
            owner: config.owner,
            id: config.id,
            merge_list: vec![[1, 1]],
        };
        write_json(&config.output, &merges).unwrap();
    }
}

#[async_trait::async_trait]
impl JobScheduler for FakeScheduler {
    async fn submit(&self, spec: &JobSpec) -> calclabels_common::Result<JobHandle> {
        let mut recorder = self.recorder.lock().unwrap();
        let previous = recorder
            .submitted
            .iter()
            .filter(|name| **name == spec.name)
            .count();
        recorder.submitted.push(spec.name.clone());
        let status = (self.policy)(&spec.name, previous).map_err(LabelError::Other)?;
        if status.is_success() {
            simulate(spec);
        }
        let handle = JobHandle(format!("{}#{}", spec.name, previous));
        recorder.statuses.insert(handle.clone(), status);
        Ok(handle)
    }

    async fn wait(
        &self,
        handles: &[JobHandle],
        _timeout: Option<Duration>,
    ) -> calclabels_common::Result<Vec<JobStatus>> {
        let mut recorder = self.recorder.lock().unwrap();
        recorder.max_wait_batch = recorder.max_wait_batch.max(handles.len());
        Ok(handles
            .iter()
            .map(|handle| recorder.statuses.remove(handle).unwrap_or(JobStatus::Lost))
            .collect())
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    statuses: Arc<Mutex<Vec<PipelineStatus>>>,
}

impl RecordingNotifier {
    fn labels(&self) -> Vec<String> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .map(|status| status.label().to_string())
            .collect()
    }
}

#[async_trait::async_trait]
impl StatusNotifier for RecordingNotifier {
    async fn notify(&self, status: &PipelineStatus) -> calclabels_common::Result<()> {
        self.statuses.lock().unwrap().push(status.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
struct FakeStore {
    instances_created: Arc<Mutex<usize>>,
}

#[async_trait::async_trait]
impl VolumeStore for FakeStore {
    fn location(&self) -> String {
        "http://dvid:8000/api/node/abc123/seg".to_string()
    }

    async fn write_raw(&self, _: &BoundingBox, _: &WriteOptions, _: &[u8]) -> StorageResult<u16> {
        Ok(200)
    }

    async fn create_label_instance(&self) -> StorageResult<()> {
        *self.instances_created.lock().unwrap() += 1;
        Ok(())
    }
}

/// 2x2x1 grid of 100-voxel substacks
fn config() -> PipelineConfig {
    serde_json::from_value(serde_json::json!({
        "uuid": "abc123",
        "dvid-server": "http://dvid:8000",
        "label-name": "seg",
        "bbox1": [0, 0, 0],
        "bbox2": [200, 200, 100],
        "job-size": 100,
        "overlap-size": 20,
        "orchestration": {
            "submit-delay-ms": 0,
            "batch-size": 3
        }
    }))
    .unwrap()
}

struct Harness {
    session: tempfile::TempDir,
    scheduler: FakeScheduler,
    notifier: RecordingNotifier,
    store: FakeStore,
}

impl Harness {
    fn new(scheduler: FakeScheduler) -> Self {
        Self {
            session: tempfile::tempdir().unwrap(),
            scheduler,
            notifier: RecordingNotifier::default(),
            store: FakeStore::default(),
        }
    }

    fn session(&self) -> PathBuf {
        self.session.path().to_path_buf()
    }

    fn orchestrator(&self, config: PipelineConfig) -> JobOrchestrator {
        JobOrchestrator::new(
            config,
            self.session(),
            Box::new(self.scheduler.clone()),
            Box::new(self.notifier.clone()),
            Box::new(self.store.clone()),
        )
    }
}

#[tokio::test]
async fn test_full_run_reaches_done() {
    let harness = Harness::new(FakeScheduler::succeeding());
    let mut orchestrator = harness.orchestrator(config());
    orchestrator.run().await.unwrap();

    assert_eq!(orchestrator.stage(), &Stage::Done);
    assert_eq!(
        harness.notifier.labels(),
        vec![
            "started",
            "generated initial labels",
            "stitched labels",
            "wrote labels",
            "finished"
        ]
    );
    assert_eq!(harness.scheduler.count("segment-"), 4);
    assert_eq!(harness.scheduler.count("stitch-"), 4);
    assert_eq!(harness.scheduler.count("write-"), 4);
    assert_eq!(*harness.store.instances_created.lock().unwrap(), 1);

    let state = orchestrator.state();
    let offsets: Vec<_> = state.substacks.iter().map(|s| s.id_offset).collect();
    assert_eq!(offsets, vec![Some(0), Some(5), Some(10), Some(15)]);
    assert_eq!(state.pairs.len(), 4);
    assert!(state.write_failures.is_empty());

    // every stitch merged body 1 across its pair, so all four collapse onto global 1
    let remap = GlobalRemap::load(&harness.session().join(REMAP_FILE)).unwrap();
    for global in [6, 11, 16] {
        assert_eq!(remap.resolve(global), 1);
    }
    assert_eq!(remap.len(), 3);

    let checkpoint: PipelineState = read_json(&harness.session().join(STATE_FILE)).unwrap();
    assert_eq!(checkpoint.stage, Stage::Done);
}

#[tokio::test]
async fn test_job_payload_configs() {
    let harness = Harness::new(FakeScheduler::succeeding());
    std::fs::write(harness.session().join("classifier.ilp"), b"ilp").unwrap();
    let mut config = config();
    config.synapses = Some("synapses.json".to_string());
    config.roi = Some("medulla".to_string());
    harness.orchestrator(config).run().await.unwrap();

    let segment: SegmentationJobConfig =
        read_json(&harness.session().join("0").join(SEGMENT_CONFIG)).unwrap();
    assert_eq!(segment.classifier, Some(harness.session().join("classifier.ilp")));
    assert_eq!(segment.synapses, None);
    assert_eq!(segment.datasrc, "http://dvid:8000/api/node/abc123/grayscale");
    assert_eq!(segment.border, 10);
    assert_eq!(segment.region, BoundingBox::new(0, 0, 0, 100, 100, 100));

    let stitch: StitchJobConfig =
        read_json(&harness.session().join("0").join("config_stitch0.json")).unwrap();
    assert_eq!(stitch.owner, 0);
    assert_eq!(stitch.bbox, BoundingBox::new(-10, -10, -10, 110, 110, 110));
    assert_eq!(stitch.stitching_mode, 2);

    let write: calclabels_common::WriteJobConfig =
        read_json(&harness.session().join("3").join(WRITE_CONFIG)).unwrap();
    assert_eq!(write.offset, 15);
    assert_eq!(write.write_location, "http://dvid:8000/api/node/abc123/seg");
    assert_eq!(write.roi.as_deref(), Some("medulla"));
    assert_eq!(write.remap, harness.session().join(REMAP_FILE));
}

#[tokio::test]
async fn test_batches_bound_outstanding_jobs() {
    let harness = Harness::new(FakeScheduler::succeeding());
    harness.orchestrator(config()).run().await.unwrap();
    assert_eq!(harness.scheduler.recorder.lock().unwrap().max_wait_batch, 3);
}

#[tokio::test(start_paused = true)]
async fn test_submit_delay_between_jobs() {
    let harness = Harness::new(FakeScheduler::succeeding());
    let mut config = config();
    config.orchestration.submit_delay_ms = 1000;
    let started = tokio::time::Instant::now();
    harness.orchestrator(config).run().await.unwrap();
    // three waves of 4 jobs in batches of 3 and 1: two delays per wave
    assert!(started.elapsed() >= Duration::from_secs(6));
}

#[tokio::test]
async fn test_segment_failure_aborts_run() {
    let scheduler = FakeScheduler::new(|name, _| {
        if name == "segment-2" {
            Ok(JobStatus::Failed { code: Some(1) })
        } else {
            Ok(JobStatus::Succeeded)
        }
    });
    let harness = Harness::new(scheduler);
    let mut orchestrator = harness.orchestrator(config());
    let err = orchestrator.run().await.unwrap_err();

    match err {
        LabelError::JobDispatch { stage, failures } => {
            assert_eq!(stage, "Segment");
            assert_eq!(failures, vec!["segment-2 (exit code 1)".to_string()]);
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(harness.scheduler.count("stitch-"), 0);
    assert!(matches!(orchestrator.stage(), Stage::Failed { .. }));
    assert_eq!(
        harness.notifier.labels(),
        vec!["started", "failed"]
    );
}

#[tokio::test]
async fn test_failed_job_is_retried() {
    let scheduler = FakeScheduler::new(|name, previous| {
        if name == "segment-1" && previous == 0 {
            Ok(JobStatus::TimedOut)
        } else {
            Ok(JobStatus::Succeeded)
        }
    });
    let harness = Harness::new(scheduler);
    let mut config = config();
    config.orchestration.job_retries = 1;
    harness.orchestrator(config).run().await.unwrap();
    assert_eq!(harness.scheduler.count("segment-1"), 2);
    assert_eq!(harness.scheduler.count("segment-"), 5);
}

#[tokio::test]
async fn test_rejected_submission_fails_stage() {
    let scheduler = FakeScheduler::new(|name, _| {
        if name.starts_with("stitch-0-") {
            Err("queue full".to_string())
        } else {
            Ok(JobStatus::Succeeded)
        }
    });
    let harness = Harness::new(scheduler);
    let err = harness.orchestrator(config()).run().await.unwrap_err();
    match err {
        LabelError::JobDispatch { stage, failures } => {
            assert_eq!(stage, "Stitch");
            assert_eq!(failures.len(), 2);
            assert!(failures[0].contains("queue full"));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn test_write_failures_are_recorded_not_fatal() {
    let scheduler = FakeScheduler::new(|name, _| {
        if name == "write-3" {
            Ok(JobStatus::Failed { code: Some(2) })
        } else {
            Ok(JobStatus::Succeeded)
        }
    });
    let harness = Harness::new(scheduler);
    let mut orchestrator = harness.orchestrator(config());
    orchestrator.run().await.unwrap();
    assert_eq!(orchestrator.stage(), &Stage::Done);
    assert_eq!(orchestrator.state().write_failures, vec![3]);
    assert!(harness
        .notifier
        .labels()
        .contains(&"wrote labels".to_string()));
}

#[tokio::test]
async fn test_resume_after_failure_skips_finished_stages() {
    let failing = FakeScheduler::new(|name, _| {
        if name == "stitch-0-1" {
            Ok(JobStatus::Failed { code: Some(1) })
        } else {
            Ok(JobStatus::Succeeded)
        }
    });
    let harness = Harness::new(failing);
    assert!(harness.orchestrator(config()).run().await.is_err());
    assert_eq!(harness.scheduler.count("segment-"), 4);

    let retry = FakeScheduler::succeeding();
    let mut resumed = JobOrchestrator::resume(
        config(),
        harness.session(),
        Box::new(retry.clone()),
        Box::new(harness.notifier.clone()),
        Box::new(harness.store.clone()),
    )
    .unwrap();
    assert_eq!(resumed.stage(), &Stage::Stitch);
    resumed.run().await.unwrap();

    assert_eq!(resumed.stage(), &Stage::Done);
    assert_eq!(retry.count("segment-"), 0);
    assert_eq!(retry.count("stitch-"), 4);
    assert_eq!(retry.count("write-"), 4);
}

#[tokio::test]
async fn test_explicit_substacks() {
    let harness = Harness::new(FakeScheduler::succeeding());
    let mut config = config();
    config.substacks = Some(vec![
        BoundingBox::new(0, 0, 0, 64, 64, 64),
        BoundingBox::new(64, 0, 0, 128, 64, 64),
    ]);
    let mut orchestrator = harness.orchestrator(config);
    orchestrator.run().await.unwrap();
    assert_eq!(orchestrator.state().substacks.len(), 2);
    assert_eq!(orchestrator.state().pairs.len(), 1);
    assert_eq!(harness.scheduler.count("stitch-0-1"), 1);
}

#[tokio::test]
async fn test_zero_overlap_runs_without_stitching() {
    let harness = Harness::new(FakeScheduler::succeeding());
    let mut config = config();
    config.overlap_size = 0;
    let mut orchestrator = harness.orchestrator(config);
    orchestrator.run().await.unwrap();

    assert_eq!(orchestrator.stage(), &Stage::Done);
    assert!(orchestrator.state().pairs.is_empty());
    assert_eq!(harness.scheduler.count("stitch-"), 0);
    assert_eq!(harness.scheduler.count("write-"), 4);
    let remap = GlobalRemap::load(&harness.session().join(REMAP_FILE)).unwrap();
    assert!(remap.is_empty());
}
