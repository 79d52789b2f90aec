use std::collections::BTreeMap;
use std::fmt::Debug;

use lore_logging::{lore_debug, lore_info, lore_warn};
use serde::{Deserialize, Serialize};

use crate::view_model::SessionSnapshot;
use crate::{SessionEffect, SessionMsg};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Pending,
    Generating,
    AwaitingReview,
    Failed,
    Accepted,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Accepted | SessionStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    Assistant,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// A structured artifact produced by one generation turn.
///
/// Individual fields can be overridden locally between turns; the overrides
/// are layered on top of the generated value when the proposal is read.
pub trait Proposal: Clone + Debug + PartialEq {
    type Key: Ord + Clone + Debug;
    type Value: Clone + Debug + PartialEq;

    fn accepts_override(&self, key: &Self::Key) -> bool;

    fn apply_override(&mut self, key: &Self::Key, value: &Self::Value);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionRejection {
    #[error("'{action}' is not allowed while {status:?}")]
    InvalidInStatus {
        action: &'static str,
        status: SessionStatus,
    },
    #[error("feedback must not be empty")]
    EmptyFeedback,
    #[error("no proposal to act on")]
    NoProposal,
    #[error("the proposal has no field {0}")]
    UnknownField(String),
    #[error("a commit is still in flight")]
    CommitInFlight,
}

/// One multi-turn generation, refined by feedback until accepted or cancelled.
#[derive(Debug, Clone, PartialEq)]
pub struct RefinementSession<P: Proposal> {
    status: SessionStatus,
    messages: Vec<ChatMessage>,
    proposal: Option<P>,
    overrides: BTreeMap<P::Key, P::Value>,
    turn: u32,
    total_cost: f64,
    last_error: Option<String>,
    commit_in_flight: bool,
    last_rejection: Option<SessionRejection>,
    dirty: bool,
}

impl<P: Proposal> Default for RefinementSession<P> {
    fn default() -> Self {
        Self {
            status: SessionStatus::Pending,
            messages: Vec::new(),
            proposal: None,
            overrides: BTreeMap::new(),
            turn: 0,
            total_cost: 0.0,
            last_error: None,
            commit_in_flight: false,
            last_rejection: None,
            dirty: false,
        }
    }
}

impl<P: Proposal> RefinementSession<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn last_rejection(&self) -> Option<&SessionRejection> {
        self.last_rejection.as_ref()
    }

    /// The latest generated proposal with local overrides applied.
    pub fn effective_proposal(&self) -> Option<P> {
        let mut proposal = self.proposal.clone()?;
        for (key, value) in &self.overrides {
            proposal.apply_override(key, value);
        }
        Some(proposal)
    }

    pub fn view(&self) -> SessionSnapshot<P> {
        SessionSnapshot {
            status: self.status,
            turn: self.turn,
            messages: self.messages.clone(),
            proposal: self.effective_proposal(),
            override_count: self.overrides.len(),
            total_cost: self.total_cost,
            last_error: self.last_error.clone(),
            commit_in_flight: self.commit_in_flight,
            last_rejection: self.last_rejection.clone(),
        }
    }

    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    fn reject(&mut self, rejection: SessionRejection) {
        lore_warn!("refinement rejected: {}", rejection);
        self.last_rejection = Some(rejection);
        self.dirty = true;
    }

    fn invalid(&mut self, action: &'static str) {
        let status = self.status;
        self.reject(SessionRejection::InvalidInStatus { action, status });
    }

    fn enter(&mut self, status: SessionStatus) {
        lore_debug!("refinement turn={} {:?} -> {:?}", self.turn, self.status, status);
        self.status = status;
        self.dirty = true;
    }

    fn is_current(&self, turn: u32) -> bool {
        self.status == SessionStatus::Generating && turn == self.turn
    }

    fn next_turn(&mut self, feedback: Option<String>) -> SessionEffect<P> {
        self.turn += 1;
        self.enter(SessionStatus::Generating);
        SessionEffect::Generate {
            turn: self.turn,
            transcript: self.messages.clone(),
            feedback,
        }
    }
}

/// Pure update function for a refinement session.
pub fn update_session<P: Proposal>(
    mut state: RefinementSession<P>,
    msg: SessionMsg<P>,
) -> (RefinementSession<P>, Vec<SessionEffect<P>>) {
    let mut effects = Vec::new();
    if msg.is_user_action() && state.last_rejection.take().is_some() {
        state.dirty = true;
    }

    match msg {
        SessionMsg::Start { context } => {
            if state.status == SessionStatus::Pending {
                state.messages.push(ChatMessage::system(context));
                effects.push(state.next_turn(None));
            } else {
                state.invalid("start");
            }
        }
        SessionMsg::TurnSucceeded {
            turn,
            proposal,
            cost,
            transcript_append,
        } => {
            if state.is_current(turn) {
                state.messages.extend(transcript_append);
                state.proposal = Some(proposal);
                state.overrides.clear();
                state.total_cost += cost;
                state.last_error = None;
                state.enter(SessionStatus::AwaitingReview);
            } else {
                lore_debug!("ignoring stale proposal from turn {}", turn);
            }
        }
        SessionMsg::TurnFailed { turn, error, cost } => {
            if state.is_current(turn) {
                lore_warn!("generation turn {} failed: {}", turn, error);
                state
                    .messages
                    .push(ChatMessage::assistant(format!("[generation failed: {error}]")));
                state.total_cost += cost;
                state.last_error = Some(error);
                state.enter(SessionStatus::Failed);
            } else {
                lore_debug!("ignoring stale failure from turn {}", turn);
            }
        }
        SessionMsg::Feedback(text) => match state.status {
            SessionStatus::AwaitingReview | SessionStatus::Failed => {
                if state.commit_in_flight {
                    state.reject(SessionRejection::CommitInFlight);
                } else if text.trim().is_empty() {
                    state.reject(SessionRejection::EmptyFeedback);
                } else {
                    state.messages.push(ChatMessage::user(text.clone()));
                    effects.push(state.next_turn(Some(text)));
                }
            }
            _ => state.invalid("feedback"),
        },
        SessionMsg::EditField { key, value } => {
            if state.status != SessionStatus::AwaitingReview {
                state.invalid("edit");
            } else if state.commit_in_flight {
                state.reject(SessionRejection::CommitInFlight);
            } else {
                let known = state
                    .proposal
                    .as_ref()
                    .map(|proposal| proposal.accepts_override(&key));
                match known {
                    None => state.reject(SessionRejection::NoProposal),
                    Some(false) => {
                        state.reject(SessionRejection::UnknownField(format!("{key:?}")))
                    }
                    Some(true) => {
                        state.overrides.insert(key, value);
                        state.dirty = true;
                    }
                }
            }
        }
        SessionMsg::Accept => match state.status {
            SessionStatus::Accepted => lore_debug!("accept ignored: already accepted"),
            SessionStatus::AwaitingReview if state.commit_in_flight => {
                lore_debug!("accept ignored: commit in flight")
            }
            SessionStatus::AwaitingReview => match state.effective_proposal() {
                Some(proposal) => {
                    state.commit_in_flight = true;
                    state.dirty = true;
                    effects.push(SessionEffect::Commit { proposal });
                }
                None => state.reject(SessionRejection::NoProposal),
            },
            _ => state.invalid("accept"),
        },
        SessionMsg::CommitSucceeded => {
            if state.commit_in_flight {
                state.commit_in_flight = false;
                lore_info!("refinement accepted after {} turns", state.turn);
                state.enter(SessionStatus::Accepted);
            }
        }
        SessionMsg::CommitFailed { error } => {
            if state.commit_in_flight {
                state.commit_in_flight = false;
                state.last_error = Some(error);
                state.dirty = true;
            }
        }
        SessionMsg::Cancel => match state.status {
            SessionStatus::Cancelled => {}
            SessionStatus::Accepted => state.invalid("cancel"),
            _ if state.commit_in_flight => state.reject(SessionRejection::CommitInFlight),
            _ => state.enter(SessionStatus::Cancelled),
        },
    }

    (state, effects)
}
