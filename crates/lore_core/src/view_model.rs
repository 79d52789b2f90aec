use serde::Serialize;

use crate::{
    BatchPhase, ChatMessage, CommitState, FailedTarget, OperationKind, Rejection, RunId,
    SessionRejection, SessionStatus,
};

/// What the confirmation screen shows before any work starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationSummary {
    pub kind: OperationKind,
    pub target_count: usize,
    /// Targets that will run with a defaulted value (e.g. no assigned tone).
    pub missing_metadata: usize,
}

/// Read-only progress of a batch, polled by the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSnapshot {
    pub kind: OperationKind,
    pub run: RunId,
    pub phase: BatchPhase,
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub current_target: Option<String>,
    pub failures: Vec<FailedTarget>,
    pub total_cost: f64,
    pub error: Option<String>,
    pub missing_metadata: usize,
    pub commit: CommitState,
    pub commit_error: Option<String>,
    pub last_rejection: Option<Rejection>,
}

impl BatchSnapshot {
    /// Terminal and not waiting on a commit.
    pub fn is_settled(&self) -> bool {
        self.phase.is_terminal() && self.commit != CommitState::InFlight
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot<P> {
    pub status: SessionStatus,
    pub turn: u32,
    pub messages: Vec<ChatMessage>,
    /// Latest proposal with local overrides applied.
    pub proposal: Option<P>,
    pub override_count: usize,
    pub total_cost: f64,
    pub last_error: Option<String>,
    pub commit_in_flight: bool,
    pub last_rejection: Option<SessionRejection>,
}
