use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lore_core::{Assignment, FieldWrite};
use lore_logging::{lore_debug, lore_info};
use serde_json::{Map, Value};

use crate::persist::{write_atomic, PersistError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("store document is malformed: {0}")]
    Malformed(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable home of content records. Only batch apply and session accept
/// write through it.
#[async_trait::async_trait]
pub trait ContentStore: Send + Sync {
    /// Apply every write or none of them.
    async fn write_fields(&self, writes: &[FieldWrite]) -> Result<(), StoreError>;
}

/// Stores records as `{ "<target id>": { "<field>": "<text>" | null } }`.
///
/// `Assignment::Inherit` removes the field, `Cleared` stores `null`.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_field(
        &self,
        target_id: &str,
        field: &str,
    ) -> Result<Assignment<String>, StoreError> {
        let document = load_document(&self.path)?;
        let value = document
            .get(target_id)
            .and_then(Value::as_object)
            .and_then(|record| record.get(field));
        match value {
            None => Ok(Assignment::Inherit),
            Some(Value::Null) => Ok(Assignment::Cleared),
            Some(Value::String(text)) => Ok(Assignment::Value(text.clone())),
            Some(other) => Err(StoreError::Malformed(format!(
                "{target_id}.{field} holds {other}"
            ))),
        }
    }
}

#[async_trait::async_trait]
impl ContentStore for JsonFileStore {
    async fn write_fields(&self, writes: &[FieldWrite]) -> Result<(), StoreError> {
        if writes.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock().await;
        let path = self.path.clone();
        let writes = writes.to_vec();
        let count = writes.len();

        tokio::task::spawn_blocking(move || {
            let mut document = load_document(&path)?;
            for write in &writes {
                apply_write(&mut document, write)?;
            }
            let content = serde_json::to_string_pretty(&Value::Object(document))
                .map_err(|err| StoreError::Malformed(err.to_string()))?;
            write_atomic(&path, &content)?;
            Ok::<_, StoreError>(())
        })
        .await
        .map_err(|err| StoreError::Unavailable(err.to_string()))??;

        lore_info!("wrote {} fields to {:?}", count, self.path);
        Ok(())
    }
}

fn load_document(path: &Path) -> Result<Map<String, Value>, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            lore_debug!("store {:?} does not exist yet", path);
            return Ok(Map::new());
        }
        Err(err) => return Err(err.into()),
    };
    match serde_json::from_str(&content) {
        Ok(Value::Object(document)) => Ok(document),
        Ok(_) => Err(StoreError::Malformed("top level is not an object".into())),
        Err(err) => Err(StoreError::Malformed(err.to_string())),
    }
}

fn apply_write(document: &mut Map<String, Value>, write: &FieldWrite) -> Result<(), StoreError> {
    let record = document
        .entry(write.target_id.clone())
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| StoreError::Malformed(format!("{} is not an object", write.target_id)))?;
    match &write.value {
        Assignment::Inherit => {
            record.remove(&write.field);
        }
        Assignment::Cleared => {
            record.insert(write.field.clone(), Value::Null);
        }
        Assignment::Value(text) => {
            record.insert(write.field.clone(), Value::String(text.clone()));
        }
    }
    Ok(())
}
