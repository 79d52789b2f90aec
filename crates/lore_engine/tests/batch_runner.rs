use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lore_core::{
    Assignment, BatchPhase, BatchSnapshot, CommitState, FieldWrite, OperationKind, Rejection,
    TargetDescriptor,
};
use lore_engine::{
    ApplyOutcome, BatchError, BatchOutput, BatchRunner, ContentGenerator, ContentStore,
    GeneratedText, GenerationRequest, Instruction, JsonFileStore, Operation, QueueSettings,
    StoreError, WorkError, WorkFn, WorkOutput, ANNOTATION_FIELD,
};
use pretty_assertions::assert_eq;
use tokio::sync::Notify;
use tokio::time::timeout;

/// Annotates every target except the ones listed as failing.
struct ScriptedGenerator {
    failing: Vec<&'static str>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    fn failing(failing: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            failing,
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait::async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedText, WorkError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.failing.contains(&request.target_id.as_str()) {
            return Err(WorkError::new("model refused"));
        }
        Ok(GeneratedText {
            text: format!("notes on {}", request.target_name),
            cost: Some(0.25),
        })
    }
}

/// Records successful writes; fails the first `failures` attempts.
#[derive(Default)]
struct FlakyStore {
    failures: AtomicUsize,
    attempts: AtomicUsize,
    writes: Mutex<Vec<Vec<FieldWrite>>>,
}

impl FlakyStore {
    fn failing_first(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicUsize::new(failures),
            ..Self::default()
        })
    }
}

#[async_trait::async_trait]
impl ContentStore for FlakyStore {
    async fn write_fields(&self, writes: &[FieldWrite]) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("store is read-only".to_string()));
        }
        self.writes.lock().unwrap().push(writes.to_vec());
        Ok(())
    }
}

/// Completes the first `free` targets, then blocks until released.
struct Throttled {
    free: usize,
    calls: AtomicUsize,
    blocked: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait::async_trait]
impl WorkFn<TargetDescriptor, BatchOutput> for Throttled {
    async fn process(
        &self,
        target: TargetDescriptor,
    ) -> Result<WorkOutput<BatchOutput>, WorkError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.free {
            self.blocked.notify_one();
            self.release.notified().await;
        }
        Ok(WorkOutput::new(vec![FieldWrite::new(
            target.id,
            ANNOTATION_FIELD,
            Assignment::Value("done".to_string()),
        )]))
    }
}

fn targets(n: usize) -> Vec<TargetDescriptor> {
    (1..=n)
        .map(|i| TargetDescriptor::new(format!("t{i}"), format!("Target {i}")))
        .collect()
}

fn annotate(generator: Arc<ScriptedGenerator>) -> Operation {
    Operation::Annotate {
        generator,
        default_tone: "neutral".to_string(),
    }
}

async fn settled(runner: &BatchRunner) -> BatchSnapshot {
    timeout(Duration::from_secs(5), runner.wait_until_settled())
        .await
        .expect("batch did not settle")
}

async fn wait_for(runner: &BatchRunner, check: impl Fn(&BatchSnapshot) -> bool) -> BatchSnapshot {
    let mut updates = runner.subscribe();
    let snapshot = timeout(Duration::from_secs(5), updates.wait_for(|s| check(s)))
        .await
        .expect("condition not reached")
        .expect("runner dropped")
        .clone();
    snapshot
}

#[tokio::test]
async fn failing_targets_do_not_stop_the_batch() {
    lore_logging::initialize_for_tests();
    let generator = ScriptedGenerator::failing(vec!["t2", "t4"]);
    let store = FlakyStore::failing_first(0);
    let runner = BatchRunner::new(annotate(generator.clone()), store, QueueSettings::default());

    let summary = runner.prepare(targets(5)).unwrap();
    assert_eq!(summary.kind, OperationKind::Annotate);
    assert_eq!(summary.target_count, 5);
    assert_eq!(summary.missing_metadata, 5);
    assert!(runner.is_busy());

    runner.confirm().unwrap();
    let snapshot = settled(&runner).await;

    assert_eq!(snapshot.phase, BatchPhase::Complete);
    assert_eq!(snapshot.processed, 5);
    assert_eq!(snapshot.succeeded, 3);
    assert_eq!(
        snapshot.failures.iter().map(|f| f.id.as_str()).collect::<Vec<_>>(),
        vec!["t2", "t4"]
    );
    assert_eq!(snapshot.failures[0].error, "model refused");
    assert_eq!(snapshot.total_cost, 0.75);
    assert_eq!(snapshot.commit, CommitState::Pending);

    let counts = runner.queue_counts();
    assert_eq!(counts.complete + counts.error, snapshot.processed);

    let requests = generator.requests.lock().unwrap();
    assert_eq!(
        requests[0].instruction,
        Instruction::Annotate {
            tone: Some("neutral".to_string())
        }
    );
}

#[tokio::test]
async fn cancel_keeps_finished_work_and_skips_the_rest() {
    lore_logging::initialize_for_tests();
    let blocked = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let worker = Arc::new(Throttled {
        free: 2,
        calls: AtomicUsize::new(0),
        blocked: blocked.clone(),
        release: release.clone(),
    });
    let runner = BatchRunner::with_worker(
        OperationKind::Annotate,
        worker.clone(),
        FlakyStore::failing_first(0),
        QueueSettings::default(),
    );

    runner.prepare(targets(5)).unwrap();
    runner.confirm().unwrap();
    timeout(Duration::from_secs(5), blocked.notified())
        .await
        .expect("third target never started");
    wait_for(&runner, |s| s.processed == 2).await;

    runner.cancel();
    release.notify_one();
    let snapshot = settled(&runner).await;
    assert_eq!(snapshot.phase, BatchPhase::Cancelled);

    while runner.queue_counts().running > 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let snapshot = runner.snapshot();
    assert_eq!(snapshot.processed, 2);
    assert_eq!(snapshot.succeeded, 2);
    assert_eq!(snapshot.commit, CommitState::Pending);
    assert_eq!(worker.calls.load(Ordering::SeqCst), 3);
    assert_eq!(runner.queue_counts().cancelled, 2);
}

#[tokio::test]
async fn apply_retries_after_a_failed_commit_and_writes_once() {
    lore_logging::initialize_for_tests();
    let store = FlakyStore::failing_first(1);
    let runner = BatchRunner::new(
        annotate(ScriptedGenerator::failing(vec![])),
        store.clone(),
        QueueSettings::default(),
    );
    runner.prepare(targets(3)).unwrap();
    runner.confirm().unwrap();
    settled(&runner).await;

    let first = runner.apply().await;
    assert!(matches!(first, Err(BatchError::Commit(_))));
    let snapshot = runner.snapshot();
    assert_eq!(snapshot.commit, CommitState::Pending);
    assert!(snapshot.commit_error.is_some());
    assert_eq!(snapshot.succeeded, 3);

    assert_eq!(runner.apply().await.unwrap(), ApplyOutcome::Committed { writes: 3 });
    assert_eq!(runner.apply().await.unwrap(), ApplyOutcome::AlreadyCommitted);

    assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
    let writes = store.writes.lock().unwrap();
    assert_eq!(writes.len(), 1);
    assert_eq!(
        writes[0][0],
        FieldWrite::new(
            "t1",
            ANNOTATION_FIELD,
            Assignment::Value("notes on Target 1".to_string())
        )
    );
}

#[tokio::test]
async fn rejections_surface_as_errors() {
    lore_logging::initialize_for_tests();
    let runner = BatchRunner::new(
        annotate(ScriptedGenerator::failing(vec![])),
        FlakyStore::failing_first(0),
        QueueSettings::default(),
    );

    assert!(matches!(
        runner.prepare(Vec::new()),
        Err(BatchError::Rejected(Rejection::NoTargets))
    ));
    assert!(!runner.is_busy());
    assert!(matches!(
        runner.apply().await,
        Err(BatchError::Rejected(Rejection::InvalidInPhase { .. }))
    ));

    runner.prepare(targets(2)).unwrap();
    runner.confirm().unwrap();
    let first = settled(&runner).await;

    assert!(matches!(
        runner.prepare(targets(1)),
        Err(BatchError::Rejected(Rejection::UncommittedResults))
    ));
    assert_eq!(
        runner.snapshot().last_rejection,
        Some(Rejection::UncommittedResults)
    );

    runner.reset().unwrap();
    assert!(!runner.is_busy());
    runner.prepare(targets(1)).unwrap();
    assert!(runner.snapshot().last_rejection.is_none());
    runner.confirm().unwrap();
    let second = wait_for(&runner, |s| s.run > first.run && s.is_settled()).await;
    assert_eq!(second.total, 1);
    assert_eq!(second.succeeded, 1);
}

#[tokio::test]
async fn clear_lands_immediately_in_the_json_store() {
    lore_logging::initialize_for_tests();
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("store.json");
    std::fs::write(
        &path,
        r#"{ "a": { "tone": "grim", "name": "A" }, "b": { "tone": null } }"#,
    )
    .unwrap();
    let store = Arc::new(JsonFileStore::new(&path));

    let runner = BatchRunner::new(
        Operation::Clear {
            field: "tone".to_string(),
        },
        store.clone(),
        QueueSettings::default(),
    );
    runner
        .prepare(vec![
            TargetDescriptor::new("a", "A"),
            TargetDescriptor::new("b", "B"),
        ])
        .unwrap();
    runner.confirm().unwrap();

    let snapshot = wait_for(&runner, |s| s.commit == CommitState::Committed).await;
    assert_eq!(snapshot.phase, BatchPhase::Complete);
    assert_eq!(snapshot.missing_metadata, 0);
    assert_eq!(store.read_field("a", "tone").unwrap(), Assignment::Inherit);
    assert_eq!(store.read_field("b", "tone").unwrap(), Assignment::Inherit);
    assert_eq!(
        store.read_field("a", "name").unwrap(),
        Assignment::Value("A".to_string())
    );

    assert_eq!(runner.apply().await.unwrap(), ApplyOutcome::AlreadyCommitted);
}

#[tokio::test]
async fn queue_counts_cover_only_the_current_run() {
    lore_logging::initialize_for_tests();
    let store = FlakyStore::failing_first(0);
    let runner = BatchRunner::new(
        Operation::Clear {
            field: "tone".to_string(),
        },
        store,
        QueueSettings::default(),
    );

    for round in 1..=3 {
        runner.prepare(targets(4)).unwrap();
        runner.confirm().unwrap();
        let snapshot =
            wait_for(&runner, |s| s.run == round && s.commit == CommitState::Committed).await;

        assert_eq!(snapshot.processed, 4);
        let counts = runner.queue_counts();
        assert_eq!(counts.complete + counts.error, snapshot.processed);
        assert_eq!(counts.queued + counts.running + counts.cancelled, 0);
    }

    let mut repeated = targets(2);
    repeated.push(TargetDescriptor::new("t2", "Target 2 again"));
    let err = runner.prepare(repeated).unwrap_err();
    assert!(matches!(
        err,
        BatchError::Rejected(Rejection::DuplicateTarget { ref target_id }) if target_id == "t2"
    ));
    assert_eq!(runner.snapshot().phase, BatchPhase::Complete);
}
