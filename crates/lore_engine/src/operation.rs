use std::sync::Arc;

use lore_core::{Assignment, FieldWrite, OperationKind, TargetDescriptor};
use lore_logging::lore_debug;

use crate::{WorkError, WorkFn, WorkOutput};

pub const ANNOTATION_FIELD: &str = "annotation";
pub const CONTENT_FIELD: &str = "content";

/// Writes produced for one target.
pub type BatchOutput = Vec<FieldWrite>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Annotate { tone: Option<String> },
    CopyEdit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub target_id: String,
    pub target_name: String,
    pub instruction: Instruction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedText {
    pub text: String,
    pub cost: Option<f64>,
}

/// Client for the text model behind annotate and copy-edit.
#[async_trait::async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedText, WorkError>;
}

/// A bulk action together with the machinery it runs on.
#[derive(Clone)]
pub enum Operation {
    Annotate {
        generator: Arc<dyn ContentGenerator>,
        default_tone: String,
    },
    CopyEdit {
        generator: Arc<dyn ContentGenerator>,
    },
    Clear {
        field: String,
    },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Annotate { .. } => OperationKind::Annotate,
            Operation::CopyEdit { .. } => OperationKind::CopyEdit,
            Operation::Clear { .. } => OperationKind::Clear,
        }
    }

    pub fn into_worker(self) -> Arc<dyn WorkFn<TargetDescriptor, BatchOutput>> {
        Arc::new(OperationWorker { operation: self })
    }
}

struct OperationWorker {
    operation: Operation,
}

#[async_trait::async_trait]
impl WorkFn<TargetDescriptor, BatchOutput> for OperationWorker {
    async fn process(
        &self,
        target: TargetDescriptor,
    ) -> Result<WorkOutput<BatchOutput>, WorkError> {
        match &self.operation {
            Operation::Annotate {
                generator,
                default_tone,
            } => {
                let tone = target.tone.resolve(default_tone).cloned();
                if target.tone.is_inherit() {
                    lore_debug!("{} has no tone; using {}", target.name, default_tone);
                }
                let generated = generator
                    .generate(GenerationRequest {
                        target_id: target.id.clone(),
                        target_name: target.name.clone(),
                        instruction: Instruction::Annotate { tone },
                    })
                    .await?;
                Ok(text_output(&target, ANNOTATION_FIELD, generated))
            }
            Operation::CopyEdit { generator } => {
                let generated = generator
                    .generate(GenerationRequest {
                        target_id: target.id.clone(),
                        target_name: target.name.clone(),
                        instruction: Instruction::CopyEdit,
                    })
                    .await?;
                Ok(text_output(&target, CONTENT_FIELD, generated))
            }
            Operation::Clear { field } => Ok(WorkOutput::new(vec![FieldWrite::new(
                target.id,
                field.clone(),
                Assignment::Inherit,
            )])),
        }
    }
}

fn text_output(
    target: &TargetDescriptor,
    field: &str,
    generated: GeneratedText,
) -> WorkOutput<BatchOutput> {
    WorkOutput {
        result: vec![FieldWrite::new(
            target.id.clone(),
            field,
            Assignment::Value(generated.text),
        )],
        cost: generated.cost,
    }
}
