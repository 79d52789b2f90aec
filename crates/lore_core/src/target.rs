use serde::{Deserialize, Serialize};

use crate::Assignment;

pub type TargetId = String;

/// One item a bulk action runs against (an entity, a chronicle, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub id: TargetId,
    pub name: String,
    #[serde(default)]
    pub tone: Assignment<String>,
}

impl TargetDescriptor {
    pub fn new(id: impl Into<TargetId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tone: Assignment::Inherit,
        }
    }

    pub fn with_tone(mut self, tone: Assignment<String>) -> Self {
        self.tone = tone;
        self
    }
}

/// One durable field update handed to the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldWrite {
    pub target_id: TargetId,
    pub field: String,
    pub value: Assignment<String>,
}

impl FieldWrite {
    pub fn new(
        target_id: impl Into<TargetId>,
        field: impl Into<String>,
        value: Assignment<String>,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            field: field.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Annotate,
    CopyEdit,
    Clear,
}

/// Whether a finished batch waits for an explicit apply or lands on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    Review,
    Immediate,
}

impl OperationKind {
    pub fn label(self) -> &'static str {
        match self {
            OperationKind::Annotate => "annotate",
            OperationKind::CopyEdit => "copy-edit",
            OperationKind::Clear => "clear",
        }
    }

    pub fn commit_policy(self) -> CommitPolicy {
        match self {
            OperationKind::Annotate | OperationKind::CopyEdit => CommitPolicy::Review,
            OperationKind::Clear => CommitPolicy::Immediate,
        }
    }

    /// True when the target lacks metadata this kind would like to have.
    /// Missing metadata never blocks a run; it is defaulted at execution.
    pub fn is_missing_metadata(self, target: &TargetDescriptor) -> bool {
        match self {
            OperationKind::Annotate => target.tone.is_inherit(),
            OperationKind::CopyEdit | OperationKind::Clear => false,
        }
    }
}
