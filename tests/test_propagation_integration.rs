//! Integration tests for derived topic propagation
//!
//! Drives a `TopicEngine` over a `LocalBus` the way the runtime does: inbound
//! messages go through `handle_message`, published derived values come back
//! from the bus subscription and are fed into the engine again.
//!
//! Key integration points tested:
//! - One publish per derived update
//! - Chained derived topics only update through the bus round trip
//! - Store bootstrap with an unreachable or hanging store
//! - Declarations persisted to definition storage
//! - The message loop feeding the engine and archiving to a store

#[cfg(test)]
mod propagation_integration_tests {
    use async_trait::async_trait;
    use serde_json::json;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use topicflow::bus::{Bus, BusMessage, BusSubscription, LocalBus};
    use topicflow::definitions::{MemoryDefinitionStorage, DERIVED_TOPICS_KEY, RAW_TOPICS_KEY};
    use topicflow::engine::TopicEngine;
    use topicflow::ingestion::run_message_loop;
    use topicflow::store::{MemoryStore, Store, StoreError, StorePoint};
    use topicflow::topics::{
        BootstrapReport, DerivedTopicDeclaration, HistoryLimits, SourceSpec, TopicValue,
    };

    const LOOKBACK: Duration = Duration::from_secs(3600);

    fn setup(storage: MemoryDefinitionStorage) -> (TopicEngine, BusSubscription, Arc<MemoryDefinitionStorage>) {
        let storage = Arc::new(storage);
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let subscription = bus.subscribe("#").unwrap();
        let engine = TopicEngine::new(bus, storage.clone(), HistoryLimits::unbounded());
        (engine, subscription, storage)
    }

    async fn next_message(subscription: &mut BusSubscription) -> Option<BusMessage> {
        tokio::time::timeout(Duration::from_millis(200), subscription.recv())
            .await
            .ok()
            .flatten()
    }

    fn map_topic(topic: &str, source: &str, transform: &str) -> DerivedTopicDeclaration {
        DerivedTopicDeclaration::new(topic, SourceSpec::Single(source.to_string()), "maptopic")
            .with_option("transform", json!(transform))
    }

    struct UnreachableStore;

    #[async_trait]
    impl Store for UnreachableStore {
        async fn write_point(&self, _: &str, _: &TopicValue, _: i64) -> Result<(), StoreError> {
            Err(StoreError::Http("connection refused".into()))
        }

        async fn query_range(&self, _: &str, _: Duration) -> Result<Vec<StorePoint>, StoreError> {
            Err(StoreError::Http("connection refused".into()))
        }

        fn backend_type(&self) -> &'static str {
            "unreachable"
        }
    }

    struct HangingStore;

    #[async_trait]
    impl Store for HangingStore {
        async fn write_point(&self, _: &str, _: &TopicValue, _: i64) -> Result<(), StoreError> {
            Ok(())
        }

        async fn query_range(&self, _: &str, _: Duration) -> Result<Vec<StorePoint>, StoreError> {
            std::future::pending().await
        }

        fn backend_type(&self) -> &'static str {
            "hanging"
        }
    }

    #[tokio::test]
    async fn test_single_publish_per_update() {
        // Test: One inbound message produces exactly one derived publish
        let (mut engine, mut subscription, _) = setup(MemoryDefinitionStorage::new());
        engine.bootstrap(None, LOOKBACK, Duration::from_secs(1)).await;
        engine.declare(map_topic("D", "A", "string-boolean"));

        engine.handle_message("A", "true");

        let message = next_message(&mut subscription).await.expect("D should be published");
        assert_eq!(message.topic, "D");
        assert_eq!(message.payload, "1");
        assert!(next_message(&mut subscription).await.is_none());

        engine.handle_message("A", "false");
        let message = next_message(&mut subscription).await.expect("D should be published");
        assert_eq!(message.payload, "0");
        assert_eq!(engine.derived().value("D"), Some(TopicValue::Number(0.0)));
    }

    #[tokio::test]
    async fn test_chained_topics_update_through_bus() {
        // Test: E watches D; it only sees D after D's publish comes back as a raw message
        let (mut engine, mut subscription, _) = setup(MemoryDefinitionStorage::new());
        engine.bootstrap(None, LOOKBACK, Duration::from_secs(1)).await;
        engine.declare(map_topic("D", "A", "string-boolean"));
        engine.declare(map_topic("E", "D", "string-float"));

        engine.handle_message("A", "true");
        assert_eq!(engine.derived().value("D"), Some(TopicValue::Number(1.0)));
        assert_eq!(engine.derived().value("E"), None);

        let published = next_message(&mut subscription).await.expect("D should be published");
        assert_eq!(published.topic, "D");
        assert!(next_message(&mut subscription).await.is_none());

        // Feed D back the way the message loop does
        engine.handle_message(&published.topic, &published.payload);

        let chained = next_message(&mut subscription).await.expect("E should be published");
        assert_eq!(chained.topic, "E");
        assert_eq!(chained.payload, "1");
        assert_eq!(engine.raw().get("D"), Some(&TopicValue::Number(1.0)));
        assert_eq!(engine.messages_processed(), 2);
    }

    #[tokio::test]
    async fn test_bootstrap_with_unreachable_store() {
        // Test: A failing store leaves sources unseeded but topics still go live
        let storage = MemoryDefinitionStorage::new()
            .with_document(
                DERIVED_TOPICS_KEY,
                json!([{ "topic": "D", "source": ["A", "B"], "calculator": "average" }]),
            )
            .with_document(RAW_TOPICS_KEY, json!([{ "topic": "A", "value": 2.0 }]));
        let (mut engine, mut subscription, _) = setup(storage);

        assert_eq!(engine.restore_snapshot().unwrap(), 1);
        assert_eq!(engine.load_declarations().unwrap(), 1);

        let store: Arc<dyn Store> = Arc::new(UnreachableStore);
        let report = engine
            .bootstrap(Some(store), LOOKBACK, Duration::from_secs(1))
            .await;

        assert_eq!(report, BootstrapReport { queried: 1, seeded: 0, failed: 1 });
        assert!(engine.derived().is_bootstrapped());
        assert!(next_message(&mut subscription).await.is_none());

        engine.handle_message("B", "4");
        let message = next_message(&mut subscription).await.expect("D should be published");
        assert_eq!(message.topic, "D");
        assert_eq!(message.payload, "3");
    }

    #[tokio::test]
    async fn test_bootstrap_query_timeout() {
        // Test: A hanging store query is abandoned after the query timeout
        let (mut engine, _subscription, _) = setup(MemoryDefinitionStorage::new());
        engine.declare(DerivedTopicDeclaration::new(
            "D",
            SourceSpec::List(vec!["A".into()]),
            "average",
        ));

        let store: Arc<dyn Store> = Arc::new(HangingStore);
        let report = tokio::time::timeout(
            Duration::from_secs(5),
            engine.bootstrap(Some(store), LOOKBACK, Duration::from_millis(50)),
        )
        .await
        .expect("bootstrap should not wait for the hanging query");

        assert_eq!(report, BootstrapReport { queried: 1, seeded: 0, failed: 1 });
        assert!(engine.derived().is_bootstrapped());
    }

    #[tokio::test]
    async fn test_bootstrap_seeds_from_store() {
        // Test: Stored values seed raw topics and derived values are computed once
        let (mut engine, mut subscription, _) = setup(MemoryDefinitionStorage::new());
        engine.declare(DerivedTopicDeclaration::new(
            "D",
            SourceSpec::List(vec!["A".into(), "B".into()]),
            "average",
        ));

        let memory = MemoryStore::new();
        let now = chrono::Utc::now().timestamp_millis();
        memory.insert("A", TopicValue::Number(1.0), now - 10_000);
        memory.insert("A", TopicValue::Number(2.0), now - 1_000);
        memory.insert("B", TopicValue::Number(6.0), now - 5_000);
        let store: Arc<dyn Store> = Arc::new(memory);

        let report = engine
            .bootstrap(Some(store), LOOKBACK, Duration::from_secs(1))
            .await;

        assert_eq!(report, BootstrapReport { queried: 2, seeded: 2, failed: 0 });
        assert_eq!(engine.raw().get("A"), Some(&TopicValue::Number(2.0)));

        let message = next_message(&mut subscription).await.expect("D should be published");
        assert_eq!(message.topic, "D");
        assert_eq!(message.payload, "4");
    }

    #[tokio::test]
    async fn test_declarations_persisted() {
        // Test: Declaring and removing derived topics rewrites the stored document
        let (mut engine, _subscription, storage) = setup(MemoryDefinitionStorage::new());

        engine.declare(map_topic("D", "A", "string-boolean"));
        engine.declare(map_topic("E", "D", "string-float"));

        let saved = storage.document(DERIVED_TOPICS_KEY).unwrap();
        assert_eq!(saved.as_array().unwrap().len(), 2);
        assert_eq!(saved[0]["topic"], json!("D"));
        assert_eq!(saved[0]["transform"], json!("string-boolean"));

        assert!(engine.remove_derived("D"));
        assert!(!engine.remove_derived("D"));

        let saved = storage.document(DERIVED_TOPICS_KEY).unwrap();
        assert_eq!(saved.as_array().unwrap().len(), 1);
        assert_eq!(saved[0]["topic"], json!("E"));
    }

    #[tokio::test]
    async fn test_excluded_topics_do_not_propagate() {
        // Test: Messages for excluded topics never reach derived topics
        let (mut engine, mut subscription, _) = setup(MemoryDefinitionStorage::new());
        engine.declare(map_topic("D", "A", "string-boolean"));

        assert!(engine.exclude("A"));
        assert!(engine.handle_message("A", "true").is_none());
        assert!(next_message(&mut subscription).await.is_none());
        assert!(engine.raw().get("A").is_none());

        assert!(engine.include("A"));
        engine.handle_message("A", "true");
        let message = next_message(&mut subscription).await.expect("D should be published");
        assert_eq!(message.payload, "1");
    }

    #[tokio::test]
    async fn test_message_loop_chains_and_archives() {
        // Test: The running loop carries s/A through D to E and archives only s/A
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let subscription = bus.subscribe("#").unwrap();
        let storage = Arc::new(MemoryDefinitionStorage::new());
        let mut engine = TopicEngine::new(bus.clone(), storage, HistoryLimits::unbounded());
        engine.set_archive_prefix(Some("s/".to_string()));
        engine.declare(map_topic("D", "s/A", "string-boolean"));
        engine.declare(map_topic("E", "D", "string-float"));
        engine.bootstrap(None, LOOKBACK, Duration::from_secs(1)).await;
        let engine = Arc::new(Mutex::new(engine));

        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn Store> = memory.clone();
        let handle = tokio::spawn(run_message_loop(subscription, engine.clone(), Some(store)));

        bus.publish("s/A", "true").unwrap();

        let mut reached = false;
        for _ in 0..200 {
            if engine.lock().derived().value("E") == Some(TopicValue::Number(1.0)) {
                reached = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(reached, "E should follow s/A through D");
        assert_eq!(engine.lock().derived().value("D"), Some(TopicValue::Number(1.0)));
        assert_eq!(memory.len(), 1);

        handle.abort();
    }
}
