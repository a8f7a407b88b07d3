//! Background tasks sharing the engine with the message loop

use crate::engine::TopicEngine;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// History sweep task - applies age and count bounds to every raw topic
///
/// Runs indefinitely until cancelled.
pub async fn history_sweep_task(engine: Arc<Mutex<TopicEngine>>, interval_ms: u64) {
    log::info!("⏰ Starting history sweep (interval: {}ms)", interval_ms);

    let mut timer = interval(Duration::from_millis(interval_ms));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        timer.tick().await;
        engine.lock().sweep();
    }
}

/// Snapshot task - periodically writes the raw topic snapshot
///
/// The first tick fires immediately and is skipped; the snapshot restored at
/// startup is still current at that point.
pub async fn snapshot_task(engine: Arc<Mutex<TopicEngine>>, interval_secs: u64) {
    log::info!("⏰ Starting snapshot autosave (interval: {}s)", interval_secs);

    let mut timer = interval(Duration::from_secs(interval_secs));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer.tick().await;

    loop {
        timer.tick().await;

        let result = engine.lock().save_snapshot();
        match result {
            Ok(count) => log::debug!("💾 Snapshot saved ({} topics)", count),
            Err(e) => log::error!("❌ Failed to save topic snapshot: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, LocalBus};
    use crate::definitions::{MemoryDefinitionStorage, RAW_TOPICS_KEY};
    use crate::topics::{ExcludeList, HistoryLimits, RawTopicRegistry};

    #[tokio::test(start_paused = true)]
    async fn test_sweep_and_snapshot_tasks() {
        let storage = Arc::new(MemoryDefinitionStorage::new());
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let limits = HistoryLimits {
            max_age_ms: None,
            max_count: Some(1),
        };
        let raw = RawTopicRegistry::new(ExcludeList::new(), limits);
        let engine = Arc::new(Mutex::new(TopicEngine::with_registry(raw, bus, storage.clone())));

        {
            let mut engine = engine.lock();
            engine.handle_message("a", "1");
            engine.handle_message("a", "2");
            engine.handle_message("a", "3");
        }

        let sweep = tokio::spawn(history_sweep_task(engine.clone(), 500));
        let snapshot = tokio::spawn(snapshot_task(engine.clone(), 60));

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(engine.lock().raw().topic("a").unwrap().history_len(), 1);
        let saved = storage.document(RAW_TOPICS_KEY).unwrap();
        assert_eq!(saved[0]["value"], serde_json::json!(3.0));

        sweep.abort();
        snapshot.abort();
    }
}
