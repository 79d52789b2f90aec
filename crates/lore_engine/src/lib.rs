//! Lore engine: task queue, effect runners, persistence and configuration.
mod config;
mod operation;
mod persist;
mod queue;
mod refine;
mod runner;
mod store;

pub use config::{ConfigError, EngineConfig, QueueSettings, ReconcileSettings};
pub use operation::{
    BatchOutput, ContentGenerator, GeneratedText, GenerationRequest, Instruction, Operation,
    ANNOTATION_FIELD, CONTENT_FIELD,
};
pub use persist::{ensure_parent_dir, write_atomic, PersistError};
pub use queue::{
    CancelScope, ItemId, ItemStatus, QueueCounts, QueueError, QueueEvent, TaskQueue, WorkError,
    WorkFn, WorkItem, WorkOutput,
};
pub use refine::{
    AcceptOutcome, FieldWriteSink, GeneratedTurn, GenerationError, Generator, IntoFieldWrites,
    ProposalSink, RefinementDriver, SessionError,
};
pub use runner::{ApplyOutcome, BatchError, BatchRunner};
pub use store::{ContentStore, JsonFileStore, StoreError};
