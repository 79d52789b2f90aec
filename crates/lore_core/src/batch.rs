use std::collections::HashSet;
use std::fmt;

use lore_logging::{lore_debug, lore_info, lore_warn};
use serde::Serialize;

use crate::view_model::{BatchSnapshot, ConfirmationSummary};
use crate::{BatchEffect, BatchMsg, CommitPolicy, OperationKind, TargetDescriptor, TargetId};

/// Identity of one fresh run; bumped every time targets are prepared.
pub type RunId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    #[default]
    Idle,
    Confirming,
    Running,
    Complete,
    Cancelled,
    Failed,
}

impl BatchPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchPhase::Complete | BatchPhase::Cancelled | BatchPhase::Failed
        )
    }
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BatchPhase::Idle => "idle",
            BatchPhase::Confirming => "confirming",
            BatchPhase::Running => "running",
            BatchPhase::Complete => "complete",
            BatchPhase::Cancelled => "cancelled",
            BatchPhase::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Durability of the results of the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitState {
    /// Nothing to persist (no successful results yet).
    #[default]
    NotRequired,
    /// Results are staged and wait for an apply.
    Pending,
    InFlight,
    Committed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    #[error("no targets to confirm")]
    NoTargets,
    #[error("target '{target_id}' is listed more than once")]
    DuplicateTarget { target_id: TargetId },
    #[error("staged results have not been applied; reset to discard them")]
    UncommittedResults,
    #[error("a commit is still in flight")]
    CommitInFlight,
    #[error("nothing to apply")]
    NothingToApply,
    #[error("'{action}' is not allowed while {phase}")]
    InvalidInPhase {
        action: &'static str,
        phase: BatchPhase,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetResult<R> {
    pub target_id: TargetId,
    pub name: String,
    pub result: R,
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTarget {
    pub id: TargetId,
    pub name: String,
    pub error: String,
}

/// One bulk action: confirm, run, land.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOperation<R> {
    kind: OperationKind,
    policy: CommitPolicy,
    run: RunId,
    phase: BatchPhase,
    targets: Vec<TargetDescriptor>,
    resolved: HashSet<TargetId>,
    results: Vec<TargetResult<R>>,
    failures: Vec<FailedTarget>,
    current_target: Option<String>,
    total_cost: f64,
    error: Option<String>,
    commit: CommitState,
    commit_error: Option<String>,
    last_rejection: Option<Rejection>,
    dirty: bool,
}

impl<R> BatchOperation<R> {
    pub fn new(kind: OperationKind) -> Self {
        Self::with_policy(kind, kind.commit_policy())
    }

    pub fn with_policy(kind: OperationKind, policy: CommitPolicy) -> Self {
        Self {
            kind,
            policy,
            run: 0,
            phase: BatchPhase::Idle,
            targets: Vec::new(),
            resolved: HashSet::new(),
            results: Vec::new(),
            failures: Vec::new(),
            current_target: None,
            total_cost: 0.0,
            error: None,
            commit: CommitState::NotRequired,
            commit_error: None,
            last_rejection: None,
            dirty: false,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn policy(&self) -> CommitPolicy {
        self.policy
    }

    pub fn run(&self) -> RunId {
        self.run
    }

    pub fn phase(&self) -> BatchPhase {
        self.phase
    }

    pub fn targets(&self) -> &[TargetDescriptor] {
        &self.targets
    }

    pub fn results(&self) -> &[TargetResult<R>] {
        &self.results
    }

    pub fn failures(&self) -> &[FailedTarget] {
        &self.failures
    }

    pub fn processed(&self) -> usize {
        self.resolved.len()
    }

    pub fn commit_state(&self) -> CommitState {
        self.commit
    }

    pub fn last_rejection(&self) -> Option<&Rejection> {
        self.last_rejection.as_ref()
    }

    pub fn missing_metadata(&self) -> usize {
        self.targets
            .iter()
            .filter(|target| self.kind.is_missing_metadata(target))
            .count()
    }

    pub fn confirmation(&self) -> Option<ConfirmationSummary> {
        (self.phase == BatchPhase::Confirming).then(|| ConfirmationSummary {
            kind: self.kind,
            target_count: self.targets.len(),
            missing_metadata: self.missing_metadata(),
        })
    }

    pub fn view(&self) -> BatchSnapshot {
        BatchSnapshot {
            kind: self.kind,
            run: self.run,
            phase: self.phase,
            total: self.targets.len(),
            processed: self.processed(),
            succeeded: self.results.len(),
            current_target: self.current_target.clone(),
            failures: self.failures.clone(),
            total_cost: self.total_cost,
            error: self.error.clone(),
            missing_metadata: self.missing_metadata(),
            commit: self.commit,
            commit_error: self.commit_error.clone(),
            last_rejection: self.last_rejection.clone(),
        }
    }

    /// Returns whether anything observable changed since the last call.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn reject(&mut self, rejection: Rejection) {
        lore_warn!("{} batch rejected: {}", self.kind.label(), rejection);
        self.last_rejection = Some(rejection);
        self.mark_dirty();
    }

    fn enter(&mut self, phase: BatchPhase) {
        lore_info!(
            "{} batch run={} {} -> {}",
            self.kind.label(),
            self.run,
            self.phase,
            phase
        );
        self.phase = phase;
        self.mark_dirty();
    }

    fn has_uncommitted(&self) -> bool {
        matches!(self.commit, CommitState::Pending | CommitState::InFlight)
    }

    fn clear_run(&mut self) {
        self.targets.clear();
        self.resolved.clear();
        self.results.clear();
        self.failures.clear();
        self.current_target = None;
        self.total_cost = 0.0;
        self.error = None;
        self.commit = CommitState::NotRequired;
        self.commit_error = None;
    }

    fn is_live(&self, run: RunId) -> bool {
        run == self.run && self.phase == BatchPhase::Running
    }

    fn target_name(&self, target_id: &str) -> Option<String> {
        self.targets
            .iter()
            .find(|target| target.id == target_id)
            .map(|target| target.name.clone())
    }

    fn next_unresolved_name(&self) -> Option<String> {
        self.targets
            .iter()
            .find(|target| !self.resolved.contains(&target.id))
            .map(|target| target.name.clone())
    }

    /// Claims a target for resolution; `None` if it is unknown or already counted.
    fn claim(&mut self, target_id: &str) -> Option<String> {
        let Some(name) = self.target_name(target_id) else {
            lore_warn!("run={} result for unknown target {}", self.run, target_id);
            return None;
        };
        if !self.resolved.insert(target_id.to_string()) {
            lore_warn!("run={} duplicate result for target {}", self.run, target_id);
            return None;
        }
        Some(name)
    }
}

impl<R: Clone> BatchOperation<R> {
    fn begin_commit(&mut self) -> BatchEffect<R> {
        self.commit = CommitState::InFlight;
        self.commit_error = None;
        self.mark_dirty();
        BatchEffect::Commit {
            run: self.run,
            results: self.results.clone(),
        }
    }

    /// Stage or land results once the run stops taking new work.
    fn settle(&mut self, effects: &mut Vec<BatchEffect<R>>) {
        self.current_target = None;
        if self.results.is_empty() {
            self.commit = CommitState::NotRequired;
            return;
        }
        match self.policy {
            CommitPolicy::Review => self.commit = CommitState::Pending,
            CommitPolicy::Immediate => effects.push(self.begin_commit()),
        }
    }

    fn after_resolution(&mut self, effects: &mut Vec<BatchEffect<R>>) {
        self.current_target = self.next_unresolved_name();
        if self.processed() == self.targets.len() {
            self.enter(BatchPhase::Complete);
            self.settle(effects);
        }
    }
}

fn first_repeated_id(targets: &[TargetDescriptor]) -> Option<TargetId> {
    let mut seen = HashSet::new();
    targets
        .iter()
        .find(|target| !seen.insert(target.id.as_str()))
        .map(|target| target.id.clone())
}

/// Pure update function: applies a message to a batch and returns any effects.
pub fn update<R: Clone>(
    mut state: BatchOperation<R>,
    msg: BatchMsg<R>,
) -> (BatchOperation<R>, Vec<BatchEffect<R>>) {
    let mut effects = Vec::new();
    if msg.is_user_action() && state.last_rejection.take().is_some() {
        state.mark_dirty();
    }

    match msg {
        BatchMsg::Prepare { targets } => match state.phase {
            BatchPhase::Running => state.reject(Rejection::InvalidInPhase {
                action: "prepare",
                phase: state.phase,
            }),
            _ if state.has_uncommitted() => state.reject(Rejection::UncommittedResults),
            _ if targets.is_empty() => state.reject(Rejection::NoTargets),
            phase => match first_repeated_id(&targets) {
                Some(target_id) => state.reject(Rejection::DuplicateTarget { target_id }),
                None => {
                    if phase.is_terminal() {
                        state.enter(BatchPhase::Idle);
                    }
                    state.clear_run();
                    state.run += 1;
                    state.targets = targets;
                    if state.phase != BatchPhase::Confirming {
                        state.enter(BatchPhase::Confirming);
                    }
                    state.mark_dirty();
                }
            },
        },
        BatchMsg::Confirm => {
            if state.phase == BatchPhase::Confirming {
                state.enter(BatchPhase::Running);
                state.current_target = state.next_unresolved_name();
                effects.push(BatchEffect::Enqueue {
                    run: state.run,
                    targets: state.targets.clone(),
                });
            } else {
                state.reject(Rejection::InvalidInPhase {
                    action: "confirm",
                    phase: state.phase,
                });
            }
        }
        BatchMsg::Cancel => match state.phase {
            BatchPhase::Confirming => {
                state.clear_run();
                state.enter(BatchPhase::Idle);
            }
            BatchPhase::Running => {
                state.enter(BatchPhase::Cancelled);
                effects.push(BatchEffect::CancelQueued { run: state.run });
                state.settle(&mut effects);
            }
            phase => lore_debug!("cancel ignored while {}", phase),
        },
        BatchMsg::ItemStarted { run, target_id } => {
            if state.is_live(run) {
                if let Some(name) = state.target_name(&target_id) {
                    state.current_target = Some(name);
                    state.mark_dirty();
                }
            } else {
                lore_debug!("stale start for {} (run={})", target_id, run);
            }
        }
        BatchMsg::ItemSucceeded {
            run,
            target_id,
            result,
            cost,
        } => {
            if !state.is_live(run) {
                lore_debug!("discarding late result for {} (run={})", target_id, run);
            } else if let Some(name) = state.claim(&target_id) {
                if let Some(cost) = cost {
                    state.total_cost += cost;
                }
                state.results.push(TargetResult {
                    target_id,
                    name,
                    result,
                    cost,
                });
                state.mark_dirty();
                state.after_resolution(&mut effects);
            }
        }
        BatchMsg::ItemFailed {
            run,
            target_id,
            error,
        } => {
            if !state.is_live(run) {
                lore_debug!("discarding late failure for {} (run={})", target_id, run);
            } else if let Some(name) = state.claim(&target_id) {
                lore_warn!("{} failed for {}: {}", state.kind.label(), name, error);
                state.failures.push(FailedTarget {
                    id: target_id,
                    name,
                    error,
                });
                state.mark_dirty();
                state.after_resolution(&mut effects);
            }
        }
        BatchMsg::QueueFailed { run, message } => {
            if state.is_live(run) {
                state.error = Some(message);
                state.enter(BatchPhase::Failed);
                effects.push(BatchEffect::CancelQueued { run });
                state.settle(&mut effects);
            } else {
                lore_debug!("stale queue failure (run={}): {}", run, message);
            }
        }
        BatchMsg::Apply => {
            if !state.phase.is_terminal() {
                state.reject(Rejection::InvalidInPhase {
                    action: "apply",
                    phase: state.phase,
                });
            } else {
                match state.commit {
                    CommitState::Pending => effects.push(state.begin_commit()),
                    CommitState::InFlight | CommitState::Committed => {
                        lore_debug!("apply ignored: commit already {:?}", state.commit);
                    }
                    CommitState::NotRequired => state.reject(Rejection::NothingToApply),
                }
            }
        }
        BatchMsg::CommitSucceeded { run } => {
            if run == state.run && state.commit == CommitState::InFlight {
                lore_info!(
                    "{} batch run={} committed {} results",
                    state.kind.label(),
                    run,
                    state.results.len()
                );
                state.commit = CommitState::Committed;
                state.mark_dirty();
            }
        }
        BatchMsg::CommitFailed { run, error } => {
            if run == state.run && state.commit == CommitState::InFlight {
                state.commit = CommitState::Pending;
                state.commit_error = Some(error);
                state.mark_dirty();
            }
        }
        BatchMsg::Reset => match state.phase {
            BatchPhase::Running => state.reject(Rejection::InvalidInPhase {
                action: "reset",
                phase: state.phase,
            }),
            _ if state.commit == CommitState::InFlight => {
                state.reject(Rejection::CommitInFlight)
            }
            _ => {
                state.clear_run();
                if state.phase != BatchPhase::Idle {
                    state.enter(BatchPhase::Idle);
                }
                state.mark_dirty();
            }
        },
    }

    (state, effects)
}
