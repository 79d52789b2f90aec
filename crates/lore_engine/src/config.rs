use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lore_core::reconcile::DEFAULT_CONTEXT_CHARS;
use lore_logging::lore_info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Work items in flight at once. External calls are rate limited, so the
    /// default is strictly sequential.
    pub concurrency: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

impl QueueSettings {
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self { concurrency }
    }

    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    pub context_chars: usize,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            context_chars: DEFAULT_CONTEXT_CHARS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub queue: QueueSettings,
    pub reconcile: ReconcileSettings,
    /// Tone used when an annotate target has none assigned.
    pub default_tone: String,
    pub store_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue: QueueSettings::default(),
            reconcile: ReconcileSettings::default(),
            default_tone: "neutral".to_string(),
            store_path: PathBuf::from("./lore_store.json"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl EngineConfig {
    /// Load a RON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                lore_info!("No config at {:?}; using defaults", path);
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_ron(&content).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_ron(content: &str) -> Result<Self, String> {
        ron::from_str(content).map_err(|err| err.to_string())
    }
}
