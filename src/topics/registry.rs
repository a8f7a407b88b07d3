//! Registry of derived topics
//!
//! Owns every `DerivedTopic` in declaration order and keeps their raw-topic
//! subscriptions in sync with their source bindings.
//!
//! ## Startup sequence
//!
//! 1. `load()` - declarations from definition storage, seeded from the raw
//!    registry (which already holds the restored snapshot)
//! 2. `bootstrap()` - one store query per source topic still lacking a value,
//!    run concurrently, each bounded by a timeout
//! 3. `recompute_all()` - every calculator once, in declaration order
//!
//! Topics declared after bootstrap go live immediately.

use super::derived::{
    DerivedTopic, DerivedTopicDeclaration, DerivedTopicListener, SharedDerivedTopic, TopicPhase,
};
use super::raw::{RawTopicRegistry, SubscriptionId};
use super::types::TopicValue;
use crate::bus::Bus;
use crate::definitions::{DefinitionError, DefinitionStorage, DERIVED_TOPICS_KEY};
use crate::store::Store;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Whether `add` created a topic or updated an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclareOutcome {
    Created,
    Updated,
}

/// Summary of a store bootstrap run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Topics queried
    pub queried: usize,
    /// Topics for which the store returned a value
    pub seeded: usize,
    /// Queries that failed or timed out
    pub failed: usize,
}

pub struct DerivedTopicRegistry {
    topics: Vec<SharedDerivedTopic>,
    index: HashMap<String, usize>,
    subscriptions: HashMap<String, Vec<SubscriptionId>>,
    bus: Arc<dyn Bus>,
    bootstrapped: bool,
}

impl DerivedTopicRegistry {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self {
            topics: Vec::new(),
            index: HashMap::new(),
            subscriptions: HashMap::new(),
            bus,
            bootstrapped: false,
        }
    }

    /// Read persisted declarations and `add` each one in order
    ///
    /// Malformed entries are skipped with a warning. Returns the number of
    /// declarations applied.
    pub fn load(
        &mut self,
        storage: &dyn DefinitionStorage,
        raw: &mut RawTopicRegistry,
    ) -> Result<usize, DefinitionError> {
        let Some(document) = storage.load_json(DERIVED_TOPICS_KEY)? else {
            log::info!("📂 No derived topic declarations found");
            return Ok(0);
        };

        let entries = match document {
            Value::Array(entries) => entries,
            other => {
                log::warn!(
                    "⚠️  Derived topic document is not a list (found {}), ignoring",
                    json_type(&other)
                );
                return Ok(0);
            }
        };

        let mut applied = 0;
        for entry in entries {
            match serde_json::from_value::<DerivedTopicDeclaration>(entry) {
                Ok(declaration) => {
                    self.add(declaration, raw);
                    applied += 1;
                }
                Err(e) => log::warn!("⚠️  Skipping malformed derived topic declaration: {}", e),
            }
        }

        log::info!("✅ Loaded {} derived topic declarations", applied);
        Ok(applied)
    }

    /// Create or redeclare a derived topic
    pub fn add(
        &mut self,
        declaration: DerivedTopicDeclaration,
        raw: &mut RawTopicRegistry,
    ) -> DeclareOutcome {
        let name = declaration.topic.clone();
        let lookup = |topic: &str| raw.get(topic).cloned();

        let (shared, outcome) = match self.index.get(&name) {
            Some(&idx) => {
                let shared = self.topics[idx].clone();
                shared.lock().redeclare(declaration, lookup);
                (shared, DeclareOutcome::Updated)
            }
            None => {
                let topic = DerivedTopic::new(declaration, self.bus.clone(), lookup);
                let shared: SharedDerivedTopic = Arc::new(Mutex::new(topic));
                self.index.insert(name.clone(), self.topics.len());
                self.topics.push(shared.clone());
                (shared, DeclareOutcome::Created)
            }
        };

        self.resubscribe(&name, &shared, raw);

        if self.bootstrapped {
            let mut topic = shared.lock();
            topic.set_phase(TopicPhase::Live);
            topic.recompute();
        }

        log::debug!("📝 Derived topic {} {:?}", name, outcome);
        outcome
    }

    /// Replace the topic's raw subscriptions with one per watched topic
    fn resubscribe(&mut self, name: &str, shared: &SharedDerivedTopic, raw: &mut RawTopicRegistry) {
        for id in self.subscriptions.remove(name).unwrap_or_default() {
            raw.unsubscribe(id);
        }

        let watched: Vec<String> = shared.lock().binding().watched_topics().to_vec();
        let listener = Arc::new(DerivedTopicListener::new(shared.clone()));
        let ids = watched
            .iter()
            .map(|topic| raw.subscribe(topic, listener.clone()))
            .collect();
        self.subscriptions.insert(name.to_string(), ids);
    }

    /// Remove a derived topic and detach its listeners
    pub fn remove(&mut self, name: &str, raw: &mut RawTopicRegistry) -> bool {
        let Some(idx) = self.index.remove(name) else {
            return false;
        };

        for id in self.subscriptions.remove(name).unwrap_or_default() {
            raw.unsubscribe(id);
        }

        self.topics.remove(idx);
        for position in self.index.values_mut() {
            if *position > idx {
                *position -= 1;
            }
        }

        log::info!("🗑️  Derived topic {} removed", name);
        true
    }

    /// Reconcile missing source values with the store
    ///
    /// Every watched topic without a value in its binding is first looked up
    /// in the raw registry, then queried from the store. Queries run
    /// concurrently and are joined before returning; a failed or timed out
    /// query only leaves its own topic unseeded. Found values seed the raw
    /// registry and every binding watching the topic.
    pub async fn bootstrap(
        &mut self,
        raw: &mut RawTopicRegistry,
        store: Arc<dyn Store>,
        lookback: Duration,
        query_timeout: Duration,
    ) -> BootstrapReport {
        let mut missing = BTreeSet::new();
        for shared in &self.topics {
            let mut topic = shared.lock();
            topic.set_phase(TopicPhase::Bootstrapping);
            let unresolved = topic.binding().missing_topics();
            for name in unresolved {
                match raw.get(&name).cloned() {
                    Some(value) => {
                        topic.binding_mut().seed_value(&name, value);
                    }
                    None if raw.excludes().contains(&name) => {
                        log::debug!("Skipping bootstrap of excluded topic {}", name);
                    }
                    None => {
                        missing.insert(name);
                    }
                }
            }
        }

        let mut report = BootstrapReport {
            queried: missing.len(),
            ..Default::default()
        };

        if !missing.is_empty() {
            log::info!(
                "🔍 Bootstrapping {} source topics from {}",
                missing.len(),
                store.backend_type()
            );
        }

        let mut queries = JoinSet::new();
        for topic in missing {
            let store = store.clone();
            queries.spawn(async move {
                let result = tokio::time::timeout(query_timeout, store.last_point(&topic, lookback)).await;
                (topic, result)
            });
        }

        while let Some(joined) = queries.join_next().await {
            let (topic, result) = match joined {
                Ok(output) => output,
                Err(e) => {
                    log::warn!("⚠️  Bootstrap query task failed: {}", e);
                    report.failed += 1;
                    continue;
                }
            };

            match result {
                Ok(Ok(Some(point))) => {
                    if raw.seed(&topic, point.value.clone(), point.time) {
                        self.seed_bindings(&topic, &point.value);
                        report.seeded += 1;
                    }
                }
                Ok(Ok(None)) => {
                    log::debug!("No stored value for {} in lookback window", topic);
                }
                Ok(Err(e)) => {
                    log::warn!("⚠️  Store query for {} failed: {}", topic, e);
                    report.failed += 1;
                }
                Err(_) => {
                    log::warn!("⚠️  Store query for {} timed out", topic);
                    report.failed += 1;
                }
            }
        }

        self.mark_live();

        log::info!(
            "✅ Bootstrap complete: {} queried, {} seeded, {} failed",
            report.queried,
            report.seeded,
            report.failed
        );
        report
    }

    /// Skip the store and go live with whatever the raw registry provides
    pub fn mark_live(&mut self) {
        for shared in &self.topics {
            shared.lock().set_phase(TopicPhase::Live);
        }
        self.bootstrapped = true;
    }

    fn seed_bindings(&self, topic: &str, value: &TopicValue) {
        for shared in &self.topics {
            shared.lock().binding_mut().seed_value(topic, value.clone());
        }
    }

    /// Run every calculator once, in declaration order
    ///
    /// Returns how many topics produced (and published) a value.
    pub fn recompute_all(&self) -> usize {
        self.topics
            .iter()
            .filter(|shared| shared.lock().recompute().is_some())
            .count()
    }

    pub fn declarations(&self) -> Vec<DerivedTopicDeclaration> {
        self.topics
            .iter()
            .map(|shared| shared.lock().declaration())
            .collect()
    }

    /// Persist the declaration list
    pub fn save(&self, storage: &dyn DefinitionStorage) -> Result<(), DefinitionError> {
        let document = serde_json::to_value(self.declarations())?;
        storage.save_json(DERIVED_TOPICS_KEY, &document)
    }

    pub fn get(&self, name: &str) -> Option<SharedDerivedTopic> {
        self.index.get(name).map(|&idx| self.topics[idx].clone())
    }

    /// Last computed value of a derived topic
    pub fn value(&self, name: &str) -> Option<TopicValue> {
        self.get(name).and_then(|shared| shared.lock().value().cloned())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.topics
            .iter()
            .map(|shared| shared.lock().name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::definitions::MemoryDefinitionStorage;
    use crate::store::{MemoryStore, StoreError, StorePoint};
    use crate::topics::exclude::ExcludeList;
    use crate::topics::raw::HistoryLimits;
    use crate::topics::source::SourceSpec;
    use crate::topics::types::current_timestamp_ms;
    use async_trait::async_trait;
    use serde_json::json;

    fn setup() -> (DerivedTopicRegistry, RawTopicRegistry) {
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        (
            DerivedTopicRegistry::new(bus),
            RawTopicRegistry::new(ExcludeList::new(), HistoryLimits::unbounded()),
        )
    }

    fn average(name: &str, sources: &[&str]) -> DerivedTopicDeclaration {
        DerivedTopicDeclaration::new(
            name,
            SourceSpec::List(sources.iter().map(|s| s.to_string()).collect()),
            "average",
        )
    }

    #[test]
    fn test_add_subscribes_watched_topics() {
        let (mut registry, mut raw) = setup();

        assert_eq!(registry.add(average("D", &["A", "B"]), &mut raw), DeclareOutcome::Created);
        assert_eq!(raw.listener_count("A"), 1);
        assert_eq!(raw.listener_count("B"), 1);

        raw.ingest("A", "2");
        raw.ingest("B", "4");
        assert_eq!(registry.value("D"), Some(TopicValue::Number(3.0)));
    }

    #[test]
    fn test_redeclare_moves_subscriptions() {
        let (mut registry, mut raw) = setup();
        registry.add(average("D", &["A", "B"]), &mut raw);

        assert_eq!(registry.add(average("D", &["B", "C"]), &mut raw), DeclareOutcome::Updated);
        assert_eq!(registry.len(), 1);
        assert_eq!(raw.listener_count("A"), 0);
        assert_eq!(raw.listener_count("B"), 1);
        assert_eq!(raw.listener_count("C"), 1);
    }

    #[test]
    fn test_redeclare_same_calculator_preserves_values() {
        let (mut registry, mut raw) = setup();
        registry.add(average("D", &["A", "B"]), &mut raw);

        // Learned directly by the binding; the raw registry stays empty
        registry
            .get("D")
            .unwrap()
            .lock()
            .on_source_update("A", &TopicValue::Number(2.0));

        registry.add(average("D", &["A", "B", "C"]), &mut raw);
        let shared = registry.get("D").unwrap();
        assert_eq!(shared.lock().binding().value("A"), Some(&TopicValue::Number(2.0)));
    }

    #[test]
    fn test_redeclare_other_calculator_discards_values() {
        let (mut registry, mut raw) = setup();
        registry.add(average("D", &["A", "B"]), &mut raw);
        registry
            .get("D")
            .unwrap()
            .lock()
            .on_source_update("A", &TopicValue::Number(2.0));

        let mut declaration = average("D", &["A", "B"]);
        declaration.calculator = Some("averagepresent".into());
        registry.add(declaration, &mut raw);

        let shared = registry.get("D").unwrap();
        assert_eq!(shared.lock().binding().value("A"), None);
        assert_eq!(shared.lock().calculator_name(), Some("averagepresent"));
    }

    #[test]
    fn test_remove_detaches_listeners() {
        let (mut registry, mut raw) = setup();
        registry.add(average("D1", &["A"]), &mut raw);
        registry.add(average("D2", &["A"]), &mut raw);
        assert_eq!(raw.listener_count("A"), 2);

        assert!(registry.remove("D1", &mut raw));
        assert!(!registry.remove("D1", &mut raw));
        assert_eq!(raw.listener_count("A"), 1);
        assert_eq!(registry.names(), vec!["D2".to_string()]);

        raw.ingest("A", "5");
        assert_eq!(registry.value("D2"), Some(TopicValue::Number(5.0)));
    }

    #[test]
    fn test_load_and_save_declarations() {
        let (mut registry, mut raw) = setup();
        let storage = MemoryDefinitionStorage::new().with_document(
            DERIVED_TOPICS_KEY,
            json!([
                {"topic": "derived/door", "source": "door", "calculator": "maptopic", "transform": "string-boolean"},
                {"topic": 42},
                {"topic": "derived/avg", "source": ["A", "B"], "calculator": "average"}
            ]),
        );

        assert_eq!(registry.load(&storage, &mut raw).unwrap(), 2);
        assert_eq!(registry.names(), vec!["derived/door", "derived/avg"]);

        registry.save(&storage).unwrap();
        let saved = storage.document(DERIVED_TOPICS_KEY).unwrap();
        assert_eq!(saved[0]["transform"], json!("string-boolean"));
        assert_eq!(saved[1]["source"], json!(["A", "B"]));
    }

    #[test]
    fn test_load_missing_document() {
        let (mut registry, mut raw) = setup();
        let storage = MemoryDefinitionStorage::new();
        assert_eq!(registry.load(&storage, &mut raw).unwrap(), 0);
    }

    #[test]
    fn test_declared_after_bootstrap_goes_live() {
        let (mut registry, mut raw) = setup();
        raw.ingest("A", "2");
        registry.mark_live();

        registry.add(average("D", &["A"]), &mut raw);
        let shared = registry.get("D").unwrap();
        assert_eq!(shared.lock().phase(), TopicPhase::Live);
        assert_eq!(shared.lock().value(), Some(&TopicValue::Number(2.0)));
    }

    /// Store double failing for one topic
    struct FlakyStore {
        inner: MemoryStore,
        failing: &'static str,
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn write_point(
            &self,
            measurement: &str,
            value: &TopicValue,
            timestamp_nanos: i64,
        ) -> Result<(), StoreError> {
            self.inner.write_point(measurement, value, timestamp_nanos).await
        }

        async fn query_range(
            &self,
            topic: &str,
            lookback: Duration,
        ) -> Result<Vec<StorePoint>, StoreError> {
            if topic == self.failing {
                return Err(StoreError::Http("connection refused".into()));
            }
            self.inner.query_range(topic, lookback).await
        }

        fn backend_type(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_bootstrap_seeds_missing_sources() {
        let (mut registry, mut raw) = setup();
        registry.add(average("D", &["A", "B", "C"]), &mut raw);
        registry.add(average("E", &["B"]), &mut raw);
        raw.ingest("C", "6");

        let now = current_timestamp_ms();
        let inner = MemoryStore::new();
        inner.insert("A", TopicValue::Number(1.0), now - 10_000);
        inner.insert("A", TopicValue::Number(2.0), now - 5_000);
        inner.insert("B", TopicValue::Number(9.0), now - 5_000);
        let store: Arc<dyn Store> = Arc::new(FlakyStore { inner, failing: "B" });

        let report = registry
            .bootstrap(&mut raw, store, Duration::from_secs(3600), Duration::from_secs(5))
            .await;

        // C came from the raw registry, A from the store, B failed
        assert_eq!(report, BootstrapReport { queried: 2, seeded: 1, failed: 1 });
        assert_eq!(raw.get("A"), Some(&TopicValue::Number(2.0)));
        assert!(raw.get("B").is_none());
        assert!(registry.is_bootstrapped());

        let d = registry.get("D").unwrap();
        assert_eq!(d.lock().binding().value("A"), Some(&TopicValue::Number(2.0)));
        assert_eq!(d.lock().binding().value("C"), Some(&TopicValue::Number(6.0)));
        assert_eq!(d.lock().phase(), TopicPhase::Live);

        // Strict average still lacks B
        assert_eq!(registry.recompute_all(), 0);

        raw.ingest("B", "4");
        assert_eq!(registry.value("D"), Some(TopicValue::Number(4.0)));
        assert_eq!(registry.value("E"), Some(TopicValue::Number(4.0)));
    }

    #[tokio::test]
    async fn test_bootstrap_skips_excluded_sources() {
        // Test: an excluded source is neither queried nor seeded into bindings
        let (mut registry, mut raw) = setup();
        raw.exclude("A");
        registry.add(average("D", &["A"]), &mut raw);

        let inner = MemoryStore::new();
        inner.insert("A", TopicValue::Number(7.0), current_timestamp_ms() - 1_000);
        let store: Arc<dyn Store> = Arc::new(FlakyStore { inner, failing: "" });

        let report = registry
            .bootstrap(&mut raw, store, Duration::from_secs(3600), Duration::from_secs(5))
            .await;

        assert_eq!(report, BootstrapReport::default());
        assert!(!raw.contains("A"));
        assert_eq!(registry.get("D").unwrap().lock().binding().value("A"), None);
        assert_eq!(registry.recompute_all(), 0);
        assert_eq!(registry.value("D"), None);
    }
}
