use crate::{ChatMessage, RunId, TargetDescriptor, TargetResult};

#[derive(Debug, Clone, PartialEq)]
pub enum BatchEffect<R> {
    /// Hand every target of the run to the task queue, in order.
    Enqueue {
        run: RunId,
        targets: Vec<TargetDescriptor>,
    },
    /// Drop not-yet-started work of the run from the task queue.
    CancelQueued { run: RunId },
    /// Persist the staged results in one batched write.
    Commit {
        run: RunId,
        results: Vec<TargetResult<R>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect<P> {
    /// Issue one generation call with the full transcript.
    Generate {
        turn: u32,
        transcript: Vec<ChatMessage>,
        feedback: Option<String>,
    },
    /// Persist the effective proposal (overrides applied).
    Commit { proposal: P },
}
