//! Topic engine - orchestration layer
//!
//! Owns the raw and derived registries and the handles they need (bus,
//! definition storage). Shared between tasks as `Arc<Mutex<TopicEngine>>`:
//! the message loop takes the lock once per bus message, the schedulers take
//! it briefly for sweeps and snapshots.
//!
//! ## Architecture
//!
//! ```text
//! BusMessage
//!     ↓
//! TopicEngine::handle_message()
//!     ├─ RawTopicRegistry::ingest() → DerivedTopic listeners → Bus::publish()
//!     └─ ArchivePoint (topic matches archive prefix)
//!            ↓  (lock released)
//!        Store::write_point()
//! ```
//!
//! ## Startup
//!
//! 1. `restore_snapshot()` - raw values from the `topics` document
//! 2. `load_declarations()` - derived topics from `virtualtopics`
//! 3. `bootstrap()` - store reconciliation, then `recompute_all`

use crate::bus::Bus;
use crate::definitions::{DefinitionError, DefinitionStorage, RAW_TOPICS_KEY};
use crate::store::Store;
use crate::topics::{
    BootstrapReport, DeclareOutcome, DerivedTopicDeclaration, DerivedTopicRegistry, ExcludeList,
    HistoryLimits, IngestOutcome, RawTopicDeclaration, RawTopicRegistry, TopicValue,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A message that has to be written to the store once the engine lock is
/// released
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivePoint {
    pub measurement: String,
    pub value: TopicValue,
    pub timestamp_nanos: i64,
}

pub struct TopicEngine {
    raw: RawTopicRegistry,
    derived: DerivedTopicRegistry,
    bus: Arc<dyn Bus>,
    storage: Arc<dyn DefinitionStorage>,
    archive_prefix: Option<String>,
    messages_processed: u64,
}

impl TopicEngine {
    /// Create an engine with the exclude list loaded from `storage`
    ///
    /// An unreadable exclude document is logged and replaced by an empty
    /// list; the next exclude or include overwrites it.
    pub fn new(bus: Arc<dyn Bus>, storage: Arc<dyn DefinitionStorage>, limits: HistoryLimits) -> Self {
        let excludes = match ExcludeList::load(storage.clone()) {
            Ok(excludes) => excludes,
            Err(e) => {
                log::warn!("⚠️  Could not load exclude list, starting empty: {}", e);
                ExcludeList::with_storage(storage.clone())
            }
        };
        let raw = RawTopicRegistry::new(excludes, limits);
        Self::with_registry(raw, bus, storage)
    }

    /// Create an engine around an existing raw registry
    ///
    /// Used by tests that need a custom clock.
    pub fn with_registry(
        raw: RawTopicRegistry,
        bus: Arc<dyn Bus>,
        storage: Arc<dyn DefinitionStorage>,
    ) -> Self {
        Self {
            raw,
            derived: DerivedTopicRegistry::new(bus.clone()),
            bus,
            storage,
            archive_prefix: None,
            messages_processed: 0,
        }
    }

    /// Archive inbound messages whose topic starts with `prefix`
    pub fn set_archive_prefix(&mut self, prefix: Option<String>) {
        self.archive_prefix = prefix.filter(|p| !p.is_empty());
    }

    /// Process one inbound bus message
    ///
    /// Propagation to derived topics happens synchronously inside this call.
    /// Returns the point to archive, if any. Excluded topics are dropped
    /// before counting and are never archived.
    pub fn handle_message(&mut self, topic: &str, payload: &str) -> Option<ArchivePoint> {
        if self.raw.ingest(topic, payload) == IngestOutcome::Excluded {
            return None;
        }
        self.messages_processed += 1;

        let prefix = self.archive_prefix.as_deref()?;
        if !topic.starts_with(prefix) {
            return None;
        }

        Some(ArchivePoint {
            measurement: topic.to_string(),
            value: TopicValue::parse(payload),
            timestamp_nanos: chrono::Utc::now()
                .timestamp_nanos_opt()
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis() * 1_000_000),
        })
    }

    /// Seed the raw registry from the `topics` document
    pub fn restore_snapshot(&mut self) -> Result<usize, DefinitionError> {
        let Some(document) = self.storage.load_json(RAW_TOPICS_KEY)? else {
            return Ok(0);
        };

        let Value::Array(entries) = document else {
            log::warn!("⚠️  Topic snapshot is not a list, ignoring");
            return Ok(0);
        };

        let declarations: Vec<RawTopicDeclaration> = entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(declaration) => Some(declaration),
                Err(e) => {
                    log::warn!("⚠️  Skipping malformed topic snapshot entry: {}", e);
                    None
                }
            })
            .collect();

        let restored = self.raw.restore(declarations);
        log::info!("📂 Restored {} topics from snapshot", restored);
        Ok(restored)
    }

    /// Declare derived topics from the `virtualtopics` document
    pub fn load_declarations(&mut self) -> Result<usize, DefinitionError> {
        self.derived.load(self.storage.as_ref(), &mut self.raw)
    }

    /// Reconcile derived topics with the store and compute every value once
    ///
    /// Without a store the derived topics go live with whatever the raw
    /// registry already holds.
    pub async fn bootstrap(
        &mut self,
        store: Option<Arc<dyn Store>>,
        lookback: Duration,
        query_timeout: Duration,
    ) -> BootstrapReport {
        let report = match store {
            Some(store) => {
                self.derived
                    .bootstrap(&mut self.raw, store, lookback, query_timeout)
                    .await
            }
            None => {
                self.derived.mark_live();
                BootstrapReport::default()
            }
        };

        let computed = self.derived.recompute_all();
        log::info!("🧮 Initial computation: {}/{} derived topics have a value", computed, self.derived.len());
        report
    }

    /// Declare (or redeclare) a derived topic and persist the declarations
    pub fn declare(&mut self, declaration: DerivedTopicDeclaration) -> DeclareOutcome {
        let outcome = self.derived.add(declaration, &mut self.raw);
        self.persist_declarations();
        outcome
    }

    /// Remove a derived topic and persist the declarations
    pub fn remove_derived(&mut self, name: &str) -> bool {
        let removed = self.derived.remove(name, &mut self.raw);
        if removed {
            self.persist_declarations();
        }
        removed
    }

    fn persist_declarations(&self) {
        if let Err(e) = self.derived.save(self.storage.as_ref()) {
            log::error!("❌ Failed to save derived topic declarations: {}", e);
        }
    }

    pub fn exclude(&mut self, topic: &str) -> bool {
        self.raw.exclude(topic)
    }

    pub fn include(&mut self, topic: &str) -> bool {
        self.raw.include(topic)
    }

    /// Apply history bounds to every raw topic
    pub fn sweep(&mut self) {
        self.raw.sweep();
    }

    /// Latest value of every raw topic
    pub fn snapshot(&self) -> Vec<RawTopicDeclaration> {
        self.raw.declarations()
    }

    /// Write the raw snapshot to the `topics` document
    pub fn save_snapshot(&self) -> Result<usize, DefinitionError> {
        let declarations = self.snapshot();
        let count = declarations.len();
        let document = serde_json::to_value(declarations)?;
        self.storage.save_json(RAW_TOPICS_KEY, &document)?;
        Ok(count)
    }

    pub fn raw(&self) -> &RawTopicRegistry {
        &self.raw
    }

    pub fn derived(&self) -> &DerivedTopicRegistry {
        &self.derived
    }

    pub fn bus(&self) -> Arc<dyn Bus> {
        self.bus.clone()
    }

    /// Messages ingested so far, excluded topics not counted
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed
    }
}
