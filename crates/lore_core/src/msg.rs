use crate::{ChatMessage, Proposal, RunId, TargetDescriptor, TargetId};

#[derive(Debug, Clone, PartialEq)]
pub enum BatchMsg<R> {
    /// Targets were computed for a bulk action and await confirmation.
    Prepare { targets: Vec<TargetDescriptor> },
    /// User approved the confirmation screen.
    Confirm,
    /// User cancelled the confirmation screen or the running batch.
    Cancel,
    /// The queue began work on a target.
    ItemStarted { run: RunId, target_id: TargetId },
    /// The work function resolved for a target.
    ItemSucceeded {
        run: RunId,
        target_id: TargetId,
        result: R,
        cost: Option<f64>,
    },
    /// The work function rejected for a target.
    ItemFailed {
        run: RunId,
        target_id: TargetId,
        error: String,
    },
    /// The queue itself could not take the run.
    QueueFailed { run: RunId, message: String },
    /// User asked to land staged results.
    Apply,
    CommitSucceeded { run: RunId },
    CommitFailed { run: RunId, error: String },
    /// User dismissed the terminal screen.
    Reset,
}

impl<R> BatchMsg<R> {
    /// Messages that originate from the user rather than from the queue or store.
    pub fn is_user_action(&self) -> bool {
        matches!(
            self,
            BatchMsg::Prepare { .. }
                | BatchMsg::Confirm
                | BatchMsg::Cancel
                | BatchMsg::Apply
                | BatchMsg::Reset
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionMsg<P: Proposal> {
    /// First generation request, seeded with the initial context.
    Start { context: String },
    TurnSucceeded {
        turn: u32,
        proposal: P,
        cost: f64,
        transcript_append: Vec<ChatMessage>,
    },
    TurnFailed {
        turn: u32,
        error: String,
        cost: f64,
    },
    /// User feedback; resubmits the full transcript.
    Feedback(String),
    /// Local override of one field of the latest proposal.
    EditField { key: P::Key, value: P::Value },
    Accept,
    CommitSucceeded,
    CommitFailed { error: String },
    Cancel,
}

impl<P: Proposal> SessionMsg<P> {
    pub fn is_user_action(&self) -> bool {
        matches!(
            self,
            SessionMsg::Start { .. }
                | SessionMsg::Feedback(_)
                | SessionMsg::EditField { .. }
                | SessionMsg::Accept
                | SessionMsg::Cancel
        )
    }
}
