//! Exclude list - topic names dropped at the ingestion point
//!
//! Excluded names never enter the raw registry. Every mutation is written
//! through to definition storage; a failed write is logged and the in-memory
//! list stays authoritative.

use crate::definitions::{DefinitionError, DefinitionStorage, EXCLUDES_KEY};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Default)]
pub struct ExcludeList {
    entries: BTreeSet<String>,
    storage: Option<Arc<dyn DefinitionStorage>>,
}

impl ExcludeList {
    /// Empty list without persistence
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty list that writes mutations to `storage`
    pub fn with_storage(storage: Arc<dyn DefinitionStorage>) -> Self {
        Self {
            entries: BTreeSet::new(),
            storage: Some(storage),
        }
    }

    /// Load the list from storage and keep writing mutations back to it
    ///
    /// A missing document yields an empty list.
    pub fn load(storage: Arc<dyn DefinitionStorage>) -> Result<Self, DefinitionError> {
        let entries = match storage.load_json(EXCLUDES_KEY)? {
            Some(document) => serde_json::from_value::<Vec<String>>(document)?
                .into_iter()
                .collect(),
            None => BTreeSet::new(),
        };

        log::info!("🚫 Loaded {} excluded topics", entries.len());

        Ok(Self {
            entries,
            storage: Some(storage),
        })
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.entries.contains(topic)
    }

    /// Add a name; returns false if it was already excluded
    pub fn add(&mut self, topic: &str) -> bool {
        if !self.entries.insert(topic.to_string()) {
            return false;
        }
        log::info!("🚫 Excluding topic {}", topic);
        self.persist();
        true
    }

    /// Remove a name; returns false if it was not excluded
    pub fn remove(&mut self, topic: &str) -> bool {
        if !self.entries.remove(topic) {
            return false;
        }
        log::info!("Topic {} no longer excluded", topic);
        self.persist();
        true
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self) {
        let Some(storage) = &self.storage else {
            return;
        };
        let document = serde_json::Value::from(self.entries.iter().cloned().collect::<Vec<_>>());
        if let Err(e) = storage.save_json(EXCLUDES_KEY, &document) {
            log::warn!("⚠️  Failed to save exclude list: {}", e);
        }
    }
}

impl std::fmt::Debug for ExcludeList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExcludeList")
            .field("entries", &self.entries)
            .field("persistent", &self.storage.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::MemoryDefinitionStorage;
    use serde_json::json;

    #[test]
    fn test_add_and_remove() {
        let mut excludes = ExcludeList::new();
        assert!(excludes.add("sensors/debug"));
        assert!(!excludes.add("sensors/debug"));
        assert!(excludes.contains("sensors/debug"));

        assert!(excludes.remove("sensors/debug"));
        assert!(!excludes.remove("sensors/debug"));
        assert!(excludes.is_empty());
    }

    #[test]
    fn test_load_and_persist() {
        // Test: every mutation is written back to storage
        let storage = Arc::new(
            MemoryDefinitionStorage::new().with_document(EXCLUDES_KEY, json!(["a/b"])),
        );
        let mut excludes = ExcludeList::load(storage.clone()).unwrap();
        assert!(excludes.contains("a/b"));

        excludes.add("c/d");
        assert_eq!(storage.document(EXCLUDES_KEY), Some(json!(["a/b", "c/d"])));

        excludes.remove("a/b");
        assert_eq!(storage.document(EXCLUDES_KEY), Some(json!(["c/d"])));
    }

    #[test]
    fn test_load_missing_document() {
        let storage = Arc::new(MemoryDefinitionStorage::new());
        let excludes = ExcludeList::load(storage).unwrap();
        assert!(excludes.is_empty());
    }

    #[test]
    fn test_with_storage_persists() {
        let storage = Arc::new(MemoryDefinitionStorage::new());
        let mut excludes = ExcludeList::with_storage(storage.clone());
        assert!(excludes.is_empty());

        excludes.add("a/b");
        assert_eq!(storage.document(EXCLUDES_KEY), Some(json!(["a/b"])));
    }

    #[test]
    fn test_load_rejects_wrong_shape() {
        let storage = Arc::new(
            MemoryDefinitionStorage::new().with_document(EXCLUDES_KEY, json!({"a": 1})),
        );
        assert!(ExcludeList::load(storage).is_err());
    }
}
