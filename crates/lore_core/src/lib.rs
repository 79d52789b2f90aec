//! Lore core: pure batch/refinement state machines and selective reconciliation.
mod assignment;
mod batch;
mod chronology;
mod effect;
mod msg;
pub mod reconcile;
mod session;
mod target;
mod view_model;
mod words;

pub use assignment::Assignment;
pub use batch::{
    update, BatchOperation, BatchPhase, CommitState, FailedTarget, Rejection, RunId, TargetResult,
};
pub use chronology::{ChronologyProposal, YEAR_FIELD};
pub use effect::{BatchEffect, SessionEffect};
pub use msg::{BatchMsg, SessionMsg};
pub use reconcile::{
    MatchId, MatchInstance, ReconcileDecisions, ReconcileError, ReconcileScan, ReconciledSource,
    SourceId, SourceKind, SourceMatches, TextSource,
};
pub use session::{
    update_session, ChatMessage, Proposal, RefinementSession, Role, SessionRejection,
    SessionStatus,
};
pub use target::{CommitPolicy, FieldWrite, OperationKind, TargetDescriptor, TargetId};
pub use view_model::{BatchSnapshot, ConfirmationSummary, SessionSnapshot};
pub use words::{WhitespaceWordCounter, WordCounter};
