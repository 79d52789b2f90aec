use std::sync::{Arc, Mutex, MutexGuard};

use lore_core::{
    update, BatchEffect, BatchMsg, BatchOperation, BatchPhase, BatchSnapshot, CommitState,
    ConfirmationSummary, OperationKind, Rejection, RunId, TargetDescriptor, TargetResult,
};
use lore_logging::{lore_debug, lore_error, lore_info};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::{
    BatchOutput, CancelScope, ContentStore, Operation, QueueCounts, QueueEvent, QueueSettings,
    StoreError, TaskQueue, WorkFn, WorkItem,
};

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("{0}")]
    Rejected(Rejection),
    #[error("commit failed: {0}")]
    Commit(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// This call landed the staged results.
    Committed { writes: usize },
    AlreadyCommitted,
    /// Another apply is landing the same results.
    InFlight,
}

type PendingCommit = (RunId, Vec<TargetResult<BatchOutput>>);

struct Step {
    rejection: Option<Rejection>,
    confirmation: Option<ConfirmationSummary>,
    commit_state: CommitState,
    commits: Vec<PendingCommit>,
}

struct RunnerCore {
    state: Mutex<BatchOperation<BatchOutput>>,
    queue: TaskQueue<TargetDescriptor, BatchOutput>,
    store: Arc<dyn ContentStore>,
    snapshots: watch::Sender<BatchSnapshot>,
}

impl RunnerCore {
    fn lock(&self) -> MutexGuard<'_, BatchOperation<BatchOutput>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs one message through `update` and executes the queue effects
    /// before releasing the state, so the queue never runs ahead of the phase.
    /// Commits are handed back to the caller.
    fn dispatch(&self, msg: BatchMsg<BatchOutput>) -> Step {
        let user_action = msg.is_user_action();
        let mut guard = self.lock();
        let kind = guard.kind();
        let current = std::mem::replace(&mut *guard, BatchOperation::new(kind));
        let (mut next, effects) = update(current, msg);

        let mut step = Step {
            rejection: if user_action {
                next.last_rejection().cloned()
            } else {
                None
            },
            confirmation: next.confirmation(),
            commit_state: next.commit_state(),
            commits: Vec::new(),
        };
        if next.consume_dirty() {
            self.snapshots.send_replace(next.view());
        }
        *guard = next;

        let mut enqueue_failure = None;
        for effect in effects {
            match effect {
                BatchEffect::Enqueue { run, targets } => {
                    self.queue.prune_settled();
                    let items: Vec<_> = targets
                        .into_iter()
                        .map(|target| WorkItem::new(item_id(run, &target.id), target))
                        .collect();
                    if let Err(err) = self.queue.enqueue(items) {
                        lore_error!("{} run={} could not be queued: {}", kind.label(), run, err);
                        enqueue_failure = Some((run, err.to_string()));
                    }
                }
                BatchEffect::CancelQueued { run } => {
                    let removed = self.queue.cancel(CancelScope::All);
                    lore_debug!("run={} dropped {} queued targets", run, removed);
                }
                BatchEffect::Commit { run, results } => step.commits.push((run, results)),
            }
        }
        drop(guard);

        if let Some((run, message)) = enqueue_failure {
            let failed = self.dispatch(BatchMsg::QueueFailed { run, message });
            step.commit_state = failed.commit_state;
            step.commits.extend(failed.commits);
        }
        step
    }

    async fn commit(
        &self,
        run: RunId,
        results: Vec<TargetResult<BatchOutput>>,
    ) -> Result<usize, StoreError> {
        let writes: Vec<_> = results
            .into_iter()
            .flat_map(|result| result.result)
            .collect();
        lore_info!("run={} committing {} field writes", run, writes.len());

        match self.store.write_fields(&writes).await {
            Ok(()) => {
                self.dispatch(BatchMsg::CommitSucceeded { run });
                Ok(writes.len())
            }
            Err(err) => {
                lore_error!("run={} commit failed: {}", run, err);
                self.dispatch(BatchMsg::CommitFailed {
                    run,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }
}

/// Drives one `BatchOperation` against a `TaskQueue` and a `ContentStore`.
///
/// Must be created inside a Tokio runtime. Queue events are folded back into
/// the operation by a background task; observers watch snapshots.
pub struct BatchRunner {
    core: Arc<RunnerCore>,
    runtime: Handle,
    pump: JoinHandle<()>,
}

impl BatchRunner {
    pub fn new(
        operation: Operation,
        store: Arc<dyn ContentStore>,
        settings: QueueSettings,
    ) -> Self {
        let kind = operation.kind();
        Self::with_worker(kind, operation.into_worker(), store, settings)
    }

    pub fn with_worker(
        kind: OperationKind,
        worker: Arc<dyn WorkFn<TargetDescriptor, BatchOutput>>,
        store: Arc<dyn ContentStore>,
        settings: QueueSettings,
    ) -> Self {
        let (queue, events) = TaskQueue::new(settings, worker);
        let state = BatchOperation::new(kind);
        let (snapshots, _) = watch::channel(state.view());
        let core = Arc::new(RunnerCore {
            state: Mutex::new(state),
            queue,
            store,
            snapshots,
        });
        let runtime = Handle::current();
        let pump = runtime.spawn(pump_events(core.clone(), events));
        Self {
            core,
            runtime,
            pump,
        }
    }

    /// Stage targets for confirmation.
    pub fn prepare(
        &self,
        targets: Vec<TargetDescriptor>,
    ) -> Result<ConfirmationSummary, BatchError> {
        let step = self.core.dispatch(BatchMsg::Prepare { targets });
        if let Some(rejection) = step.rejection {
            return Err(BatchError::Rejected(rejection));
        }
        step.confirmation
            .ok_or(BatchError::Rejected(Rejection::NoTargets))
    }

    pub fn confirm(&self) -> Result<(), BatchError> {
        let step = self.core.dispatch(BatchMsg::Confirm);
        self.spawn_commits(step.commits);
        step.rejection
            .map_or(Ok(()), |rejection| Err(BatchError::Rejected(rejection)))
    }

    /// Backs out of confirmation, or stops dispatching further targets.
    /// A target already in flight finishes and its result is discarded.
    pub fn cancel(&self) {
        let step = self.core.dispatch(BatchMsg::Cancel);
        self.spawn_commits(step.commits);
    }

    /// Land staged results. Repeated calls never write twice.
    pub async fn apply(&self) -> Result<ApplyOutcome, BatchError> {
        let step = self.core.dispatch(BatchMsg::Apply);
        if let Some(rejection) = step.rejection {
            return Err(BatchError::Rejected(rejection));
        }

        let mut outcome = match step.commit_state {
            CommitState::Committed => ApplyOutcome::AlreadyCommitted,
            _ => ApplyOutcome::InFlight,
        };
        for (run, results) in step.commits {
            let writes = self.core.commit(run, results).await?;
            outcome = ApplyOutcome::Committed { writes };
        }
        Ok(outcome)
    }

    pub fn reset(&self) -> Result<(), BatchError> {
        let step = self.core.dispatch(BatchMsg::Reset);
        step.rejection
            .map_or(Ok(()), |rejection| Err(BatchError::Rejected(rejection)))
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        self.core.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchSnapshot> {
        self.core.snapshots.subscribe()
    }

    /// Waits for a terminal phase with no commit in flight. Only meaningful
    /// after `confirm`.
    pub async fn wait_until_settled(&self) -> BatchSnapshot {
        let mut updates = self.subscribe();
        let settled = updates
            .wait_for(BatchSnapshot::is_settled)
            .await
            .map(|snapshot| snapshot.clone());
        settled.unwrap_or_else(|_| self.snapshot())
    }

    /// True while the trigger for a new batch should stay disabled.
    pub fn is_busy(&self) -> bool {
        self.snapshot().phase != BatchPhase::Idle
    }

    /// Queue counts for the current run only.
    pub fn queue_counts(&self) -> QueueCounts {
        let run = self.core.lock().run();
        self.core.queue.counts_matching(|id| {
            matches!(parse_item_id(id), Some((item_run, _)) if item_run == run)
        })
    }

    fn spawn_commits(&self, commits: Vec<PendingCommit>) {
        for (run, results) in commits {
            let core = self.core.clone();
            self.runtime.spawn(async move {
                // Failures are recorded on the operation.
                let _ = core.commit(run, results).await;
            });
        }
    }
}

impl Drop for BatchRunner {
    fn drop(&mut self) {
        self.core.queue.shutdown();
        self.pump.abort();
    }
}

fn item_id(run: RunId, target_id: &str) -> String {
    format!("{run}/{target_id}")
}

fn parse_item_id(id: &str) -> Option<(RunId, String)> {
    let (run, target_id) = id.split_once('/')?;
    Some((run.parse().ok()?, target_id.to_string()))
}

async fn pump_events(
    core: Arc<RunnerCore>,
    mut events: mpsc::UnboundedReceiver<QueueEvent<BatchOutput>>,
) {
    while let Some(event) = events.recv().await {
        let (id, msg) = match event {
            QueueEvent::Started { id } => {
                let Some((run, target_id)) = parse_item_id(&id) else {
                    lore_error!("queue reported unknown item {}", id);
                    continue;
                };
                (id, BatchMsg::ItemStarted { run, target_id })
            }
            QueueEvent::Finished { id, outcome } => {
                let Some((run, target_id)) = parse_item_id(&id) else {
                    lore_error!("queue reported unknown item {}", id);
                    continue;
                };
                let msg = match outcome {
                    Ok(output) => BatchMsg::ItemSucceeded {
                        run,
                        target_id,
                        result: output.result,
                        cost: output.cost,
                    },
                    Err(error) => BatchMsg::ItemFailed {
                        run,
                        target_id,
                        error,
                    },
                };
                (id, msg)
            }
            QueueEvent::Drained => continue,
        };

        lore_debug!("queue event for {}", id);
        let step = core.dispatch(msg);
        for (run, results) in step.commits {
            let _ = core.commit(run, results).await;
        }
    }
}
