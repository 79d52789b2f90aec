use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::FutureExt;
use lore_logging::{lore_debug, lore_error, lore_info, lore_warn};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::QueueSettings;

pub type ItemId = String;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkOutput<R> {
    pub result: R,
    pub cost: Option<f64>,
}

impl<R> WorkOutput<R> {
    pub fn new(result: R) -> Self {
        Self { result, cost: None }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }
}

/// A per-item rejection from the work function.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct WorkError {
    pub message: String,
}

impl WorkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The injected unit of work run once per queued item.
#[async_trait::async_trait]
pub trait WorkFn<P, R>: Send + Sync {
    async fn process(&self, payload: P) -> Result<WorkOutput<R>, WorkError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemStatus<R> {
    Queued,
    Running,
    Complete(WorkOutput<R>),
    Error(String),
    /// Removed by `cancel` before it was dispatched.
    Cancelled,
}

impl<R> ItemStatus<R> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ItemStatus::Complete(_) | ItemStatus::Error(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem<P, R> {
    pub id: ItemId,
    pub payload: P,
    pub status: ItemStatus<R>,
}

impl<P, R> WorkItem<P, R> {
    pub fn new(id: impl Into<ItemId>, payload: P) -> Self {
        Self {
            id: id.into(),
            payload,
            status: ItemStatus::Queued,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelScope {
    Item(ItemId),
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent<R> {
    Started {
        id: ItemId,
    },
    Finished {
        id: ItemId,
        outcome: Result<WorkOutput<R>, String>,
    },
    /// Nothing queued and nothing running.
    Drained,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("work item id {0} is already queued")]
    DuplicateId(ItemId),
    #[error("task queue is shut down")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueCounts {
    pub queued: usize,
    pub running: usize,
    pub complete: usize,
    pub error: usize,
    pub cancelled: usize,
}

struct QueueState<P, R> {
    items: Vec<WorkItem<P, R>>,
    index: HashMap<ItemId, usize>,
    /// Every item before the cursor has left the queued state.
    cursor: usize,
    running: usize,
}

impl<P: Clone, R> QueueState<P, R> {
    fn claim_next(&mut self) -> Option<(ItemId, P)> {
        while let Some(item) = self.items.get_mut(self.cursor) {
            self.cursor += 1;
            if matches!(item.status, ItemStatus::Queued) {
                item.status = ItemStatus::Running;
                self.running += 1;
                return Some((item.id.clone(), item.payload.clone()));
            }
        }
        None
    }

    fn has_queued(&self) -> bool {
        self.items[self.cursor..]
            .iter()
            .any(|item| matches!(item.status, ItemStatus::Queued))
    }
}

struct Shared<P, R> {
    state: Mutex<QueueState<P, R>>,
    wake: Notify,
    shutdown: CancellationToken,
    events: mpsc::UnboundedSender<QueueEvent<R>>,
}

impl<P, R> Shared<P, R> {
    fn lock(&self) -> MutexGuard<'_, QueueState<P, R>> {
        // A poisoned lock only means a panic elsewhere; the item table is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: QueueEvent<R>) {
        let _ = self.events.send(event);
    }
}

/// Executes a work function over items in enqueue order, at most
/// `concurrency` at a time. A failing item never stops the queue.
pub struct TaskQueue<P, R> {
    shared: Arc<Shared<P, R>>,
}

impl<P, R> Clone for TaskQueue<P, R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<P, R> TaskQueue<P, R>
where
    P: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    /// Spawns the dispatch loop; must be called from within a Tokio runtime.
    pub fn new(
        settings: QueueSettings,
        worker: Arc<dyn WorkFn<P, R>>,
    ) -> (Self, mpsc::UnboundedReceiver<QueueEvent<R>>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                items: Vec::new(),
                index: HashMap::new(),
                cursor: 0,
                running: 0,
            }),
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
            events,
        });

        tokio::spawn(dispatch_loop(
            shared.clone(),
            worker,
            settings.effective_concurrency(),
        ));

        (Self { shared }, event_rx)
    }

    /// Append items in `queued` status; returns how many were added.
    pub fn enqueue(&self, items: Vec<WorkItem<P, R>>) -> Result<usize, QueueError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(QueueError::Closed);
        }
        if items.is_empty() {
            return Ok(0);
        }

        let mut state = self.shared.lock();
        let mut incoming = HashSet::new();
        for item in &items {
            if state.index.contains_key(&item.id) || !incoming.insert(item.id.as_str()) {
                return Err(QueueError::DuplicateId(item.id.clone()));
            }
        }

        let added = items.len();
        for mut item in items {
            item.status = ItemStatus::Queued;
            let position = state.items.len();
            state.index.insert(item.id.clone(), position);
            state.items.push(item);
        }
        drop(state);

        lore_debug!("enqueued {} work items", added);
        self.shared.wake.notify_one();
        Ok(added)
    }

    /// Remove queued items. Running items are left to finish.
    pub fn cancel(&self, scope: CancelScope) -> usize {
        let mut state = self.shared.lock();
        let mut removed = 0;
        match scope {
            CancelScope::Item(id) => {
                if let Some(&position) = state.index.get(&id) {
                    let item = &mut state.items[position];
                    if matches!(item.status, ItemStatus::Queued) {
                        item.status = ItemStatus::Cancelled;
                        removed = 1;
                    }
                }
            }
            CancelScope::All => {
                let cursor = state.cursor;
                for item in &mut state.items[cursor..] {
                    if matches!(item.status, ItemStatus::Queued) {
                        item.status = ItemStatus::Cancelled;
                        removed += 1;
                    }
                }
            }
        }
        let idle = state.running == 0 && !state.has_queued();
        drop(state);

        if removed > 0 {
            lore_info!("cancelled {} queued work items", removed);
            if idle {
                self.shared.emit(QueueEvent::Drained);
            }
        }
        removed
    }
}

impl<P: Clone, R: Clone> TaskQueue<P, R> {
    /// Live copy of every item and its status, in enqueue order.
    pub fn snapshot(&self) -> Vec<WorkItem<P, R>> {
        self.shared.lock().items.clone()
    }
}

impl<P, R> TaskQueue<P, R> {
    pub fn counts(&self) -> QueueCounts {
        self.counts_matching(|_| true)
    }

    /// Counts restricted to items whose id passes `filter`.
    pub fn counts_matching(&self, filter: impl Fn(&str) -> bool) -> QueueCounts {
        let state = self.shared.lock();
        let mut counts = QueueCounts::default();
        for item in state.items.iter().filter(|item| filter(&item.id)) {
            match item.status {
                ItemStatus::Queued => counts.queued += 1,
                ItemStatus::Running => counts.running += 1,
                ItemStatus::Complete(_) => counts.complete += 1,
                ItemStatus::Error(_) => counts.error += 1,
                ItemStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Forget finished and cancelled items; queued and running ones stay in order.
    pub fn prune_settled(&self) -> usize {
        let mut state = self.shared.lock();
        let before = state.items.len();
        state
            .items
            .retain(|item| matches!(item.status, ItemStatus::Queued | ItemStatus::Running));
        let index = state
            .items
            .iter()
            .enumerate()
            .map(|(position, item)| (item.id.clone(), position))
            .collect();
        state.index = index;
        state.cursor = 0;
        let pruned = before - state.items.len();
        drop(state);

        if pruned > 0 {
            lore_debug!("pruned {} settled work items", pruned);
        }
        pruned
    }

    pub fn is_idle(&self) -> bool {
        let counts = self.counts();
        counts.queued == 0 && counts.running == 0
    }

    /// Stop dispatching. In-flight items run to completion unobserved.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
    }
}

type Joined<R> = (ItemId, Result<WorkOutput<R>, WorkError>);

async fn dispatch_loop<P, R>(
    shared: Arc<Shared<P, R>>,
    worker: Arc<dyn WorkFn<P, R>>,
    concurrency: usize,
) where
    P: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    let mut in_flight: JoinSet<Joined<R>> = JoinSet::new();
    let mut drained = true;

    loop {
        while in_flight.len() < concurrency {
            let claimed = shared.lock().claim_next();
            let Some((id, payload)) = claimed else {
                break;
            };
            drained = false;
            lore_debug!("dispatching work item {}", id);
            shared.emit(QueueEvent::Started { id: id.clone() });

            let worker = worker.clone();
            in_flight.spawn(async move {
                let outcome = AssertUnwindSafe(worker.process(payload))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(WorkError::new("work item panicked")));
                (id, outcome)
            });
        }

        if in_flight.is_empty() {
            if !drained {
                drained = true;
                shared.emit(QueueEvent::Drained);
            }
            tokio::select! {
                _ = shared.shutdown.cancelled() => break,
                _ = shared.wake.notified() => continue,
            }
        }

        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = shared.wake.notified() => {}
            joined = in_flight.join_next() => match joined {
                Some(Ok((id, outcome))) => record(&shared, id, outcome),
                Some(Err(err)) => lore_error!("work task did not complete: {}", err),
                None => {}
            },
        }
    }

    lore_debug!("task queue dispatch loop stopped");
    in_flight.detach_all();
}

fn record<P, R: Clone>(
    shared: &Shared<P, R>,
    id: ItemId,
    outcome: Result<WorkOutput<R>, WorkError>,
) {
    let mut state = shared.lock();
    state.running = state.running.saturating_sub(1);
    let Some(&position) = state.index.get(&id) else {
        lore_error!("finished work item {} is not in the queue", id);
        return;
    };

    let event_outcome = match outcome {
        Ok(output) => {
            state.items[position].status = ItemStatus::Complete(output.clone());
            Ok(output)
        }
        Err(err) => {
            lore_warn!("work item {} failed: {}", id, err);
            state.items[position].status = ItemStatus::Error(err.message.clone());
            Err(err.message)
        }
    };
    drop(state);

    shared.emit(QueueEvent::Finished {
        id,
        outcome: event_outcome,
    });
}
