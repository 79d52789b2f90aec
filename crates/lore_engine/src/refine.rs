use std::sync::{Arc, Mutex, MutexGuard};

use lore_core::{
    update_session, ChatMessage, ChronologyProposal, FieldWrite, Proposal, RefinementSession,
    SessionEffect, SessionMsg, SessionRejection, SessionSnapshot, SessionStatus,
};
use lore_logging::{lore_debug, lore_error, lore_info};
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::{ContentStore, StoreError};

/// Output of one successful generation turn.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedTurn<P> {
    pub proposal: P,
    pub cost: f64,
    /// Messages the model produced this turn, appended to the transcript.
    pub transcript_append: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct GenerationError {
    pub message: String,
    /// Spend reported for the failed call, if any.
    pub cost: f64,
}

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cost: 0.0,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }
}

/// Multi-turn model client. Receives the full transcript every turn.
#[async_trait::async_trait]
pub trait Generator<P>: Send + Sync {
    async fn generate(
        &self,
        transcript: &[ChatMessage],
        feedback: Option<&str>,
    ) -> Result<GeneratedTurn<P>, GenerationError>;
}

/// Where an accepted proposal lands.
#[async_trait::async_trait]
pub trait ProposalSink<P>: Send + Sync {
    async fn commit(&self, proposal: &P) -> Result<(), StoreError>;
}

pub trait IntoFieldWrites {
    fn to_field_writes(&self) -> Vec<FieldWrite>;
}

impl IntoFieldWrites for ChronologyProposal {
    fn to_field_writes(&self) -> Vec<FieldWrite> {
        self.field_writes()
    }
}

/// Commits a proposal as one atomic batch of field writes.
pub struct FieldWriteSink {
    store: Arc<dyn ContentStore>,
}

impl FieldWriteSink {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl<P> ProposalSink<P> for FieldWriteSink
where
    P: IntoFieldWrites + Send + Sync,
{
    async fn commit(&self, proposal: &P) -> Result<(), StoreError> {
        self.store.write_fields(&proposal.to_field_writes()).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{0}")]
    Rejected(SessionRejection),
    #[error("commit failed: {0}")]
    Commit(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted,
    AlreadyAccepted,
    InFlight,
}

struct DriverInner<P: Proposal> {
    state: Mutex<RefinementSession<P>>,
    generator: Arc<dyn Generator<P>>,
    sink: Arc<dyn ProposalSink<P>>,
    snapshots: watch::Sender<SessionSnapshot<P>>,
    runtime: Handle,
}

/// Runs a `RefinementSession`: generation calls in the background, commits
/// awaited by the caller of `accept`.
pub struct RefinementDriver<P: Proposal> {
    inner: Arc<DriverInner<P>>,
}

impl<P: Proposal> Clone for RefinementDriver<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P> DriverInner<P>
where
    P: Proposal + Send + Sync + 'static,
    P::Key: Send + Sync,
    P::Value: Send + Sync,
{
    fn lock(&self) -> MutexGuard<'_, RefinementSession<P>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn dispatch(self: &Arc<Self>, msg: SessionMsg<P>) -> (Option<SessionRejection>, Option<P>) {
        let user_action = msg.is_user_action();
        let mut guard = self.lock();
        let current = std::mem::take(&mut *guard);
        let (mut next, effects) = update_session(current, msg);

        let rejection = if user_action {
            next.last_rejection().cloned()
        } else {
            None
        };
        if next.consume_dirty() {
            self.snapshots.send_replace(next.view());
        }
        *guard = next;
        drop(guard);

        let mut commit = None;
        for effect in effects {
            match effect {
                SessionEffect::Generate {
                    turn,
                    transcript,
                    feedback,
                } => self.spawn_turn(turn, transcript, feedback),
                SessionEffect::Commit { proposal } => commit = Some(proposal),
            }
        }
        (rejection, commit)
    }

    fn spawn_turn(
        self: &Arc<Self>,
        turn: u32,
        transcript: Vec<ChatMessage>,
        feedback: Option<String>,
    ) {
        let inner = self.clone();
        self.runtime.spawn(async move {
            lore_debug!("generation turn {} with {} messages", turn, transcript.len());
            let outcome = inner
                .generator
                .generate(&transcript, feedback.as_deref())
                .await;
            let msg = match outcome {
                Ok(generated) => SessionMsg::TurnSucceeded {
                    turn,
                    proposal: generated.proposal,
                    cost: generated.cost,
                    transcript_append: generated.transcript_append,
                },
                Err(err) => SessionMsg::TurnFailed {
                    turn,
                    error: err.message,
                    cost: err.cost,
                },
            };
            inner.dispatch(msg);
        });
    }
}

impl<P> RefinementDriver<P>
where
    P: Proposal + Send + Sync + 'static,
    P::Key: Send + Sync,
    P::Value: Send + Sync,
{
    /// Must be called from within a Tokio runtime.
    pub fn new(generator: Arc<dyn Generator<P>>, sink: Arc<dyn ProposalSink<P>>) -> Self {
        let state = RefinementSession::new();
        let (snapshots, _) = watch::channel(state.view());
        Self {
            inner: Arc::new(DriverInner {
                state: Mutex::new(state),
                generator,
                sink,
                snapshots,
                runtime: Handle::current(),
            }),
        }
    }

    pub fn start(&self, context: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionMsg::Start {
            context: context.into(),
        })
    }

    pub fn feedback(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionMsg::Feedback(text.into()))
    }

    /// Override one field of the latest proposal until the next turn replaces it.
    pub fn edit(&self, key: P::Key, value: P::Value) -> Result<(), SessionError> {
        self.send(SessionMsg::EditField { key, value })
    }

    pub fn cancel(&self) -> Result<(), SessionError> {
        self.send(SessionMsg::Cancel)
    }

    /// Commit the effective proposal. On a store failure the session stays in
    /// review with the proposal intact and `accept` may be called again.
    pub async fn accept(&self) -> Result<AcceptOutcome, SessionError> {
        let (rejection, commit) = self.inner.dispatch(SessionMsg::Accept);
        if let Some(rejection) = rejection {
            return Err(SessionError::Rejected(rejection));
        }
        let Some(proposal) = commit else {
            return Ok(if self.snapshot().status == SessionStatus::Accepted {
                AcceptOutcome::AlreadyAccepted
            } else {
                AcceptOutcome::InFlight
            });
        };

        match self.inner.sink.commit(&proposal).await {
            Ok(()) => {
                self.inner.dispatch(SessionMsg::CommitSucceeded);
                lore_info!("refinement proposal committed");
                Ok(AcceptOutcome::Accepted)
            }
            Err(err) => {
                lore_error!("refinement commit failed: {}", err);
                self.inner.dispatch(SessionMsg::CommitFailed {
                    error: err.to_string(),
                });
                Err(SessionError::Commit(err))
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot<P> {
        self.inner.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot<P>> {
        self.inner.snapshots.subscribe()
    }

    /// Waits until no generation turn is outstanding.
    pub async fn wait_for_turn(&self) -> SessionSnapshot<P> {
        let mut updates = self.subscribe();
        let ready = updates
            .wait_for(|snapshot| snapshot.status != SessionStatus::Generating)
            .await
            .map(|snapshot| snapshot.clone());
        ready.unwrap_or_else(|_| self.snapshot())
    }

    fn send(&self, msg: SessionMsg<P>) -> Result<(), SessionError> {
        let (rejection, _) = self.inner.dispatch(msg);
        rejection.map_or(Ok(()), |rejection| Err(SessionError::Rejected(rejection)))
    }
}
