//! JSON document persistence for topic declarations and the exclude list
//!
//! Three logical documents are stored:
//! - `topics` - snapshot of raw topics with their latest value
//! - `virtualtopics` - derived topic declarations
//! - `excludes` - list of excluded topic names
//!
//! Writes are best effort: callers log failures and keep their in-memory
//! state, which stays authoritative until the next successful save.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Document key for the raw topic snapshot
pub const RAW_TOPICS_KEY: &str = "topics";

/// Document key for derived topic declarations
pub const DERIVED_TOPICS_KEY: &str = "virtualtopics";

/// Document key for the exclude list
pub const EXCLUDES_KEY: &str = "excludes";

#[derive(Debug)]
pub enum DefinitionError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
}

impl From<std::io::Error> for DefinitionError {
    fn from(err: std::io::Error) -> Self {
        DefinitionError::Io(err)
    }
}

impl From<serde_json::Error> for DefinitionError {
    fn from(err: serde_json::Error) -> Self {
        DefinitionError::Serialization(err)
    }
}

impl std::fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefinitionError::Io(e) => write!(f, "IO error: {}", e),
            DefinitionError::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for DefinitionError {}

/// Durable key/document storage
pub trait DefinitionStorage: Send + Sync {
    /// Load a document; `Ok(None)` when it was never saved
    fn load_json(&self, key: &str) -> Result<Option<Value>, DefinitionError>;

    /// Replace a document
    fn save_json(&self, key: &str, document: &Value) -> Result<(), DefinitionError>;
}

/// Stores each document as `<dir>/<key>.json`
#[derive(Debug, Clone)]
pub struct FileDefinitionStorage {
    dir: PathBuf,
}

impl FileDefinitionStorage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl DefinitionStorage for FileDefinitionStorage {
    fn load_json(&self, key: &str) -> Result<Option<Value>, DefinitionError> {
        let path = self.path_for(key);
        if !path.exists() {
            log::info!("No existing definition file found: {}", path.display());
            return Ok(None);
        }

        let json = fs::read_to_string(&path)?;
        let document: Value = serde_json::from_str(&json)?;

        log::debug!("Loaded definition document {}", path.display());
        Ok(Some(document))
    }

    fn save_json(&self, key: &str, document: &Value) -> Result<(), DefinitionError> {
        fs::create_dir_all(&self.dir)?;

        // Write to a sibling file first so a crash never leaves half a document
        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(document)?;
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &path)?;

        log::debug!("Saved definition document {}", path.display());
        Ok(())
    }
}

/// In-memory storage for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryDefinitionStorage {
    documents: Mutex<HashMap<String, Value>>,
}

impl MemoryDefinitionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a document
    pub fn with_document(self, key: &str, document: Value) -> Self {
        self.documents.lock().insert(key.to_string(), document);
        self
    }

    /// Copy of a stored document
    pub fn document(&self, key: &str) -> Option<Value> {
        self.documents.lock().get(key).cloned()
    }
}

impl DefinitionStorage for MemoryDefinitionStorage {
    fn load_json(&self, key: &str) -> Result<Option<Value>, DefinitionError> {
        Ok(self.documents.lock().get(key).cloned())
    }

    fn save_json(&self, key: &str, document: &Value) -> Result<(), DefinitionError> {
        self.documents.lock().insert(key.to_string(), document.clone());
        Ok(())
    }
}
