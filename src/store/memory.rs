use super::{window_start_ms, Store, StoreError, StorePoint};
use crate::topics::types::{current_timestamp_ms, TopicValue};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

/// In-process store keeping every point in memory
#[derive(Default)]
pub struct MemoryStore {
    points: Mutex<Vec<StorePoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a point with a millisecond timestamp
    pub fn insert(&self, topic: &str, value: TopicValue, time_ms: i64) {
        self.points.lock().push(StorePoint {
            topic: topic.to_string(),
            time: time_ms,
            value,
        });
    }

    pub fn len(&self) -> usize {
        self.points.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.lock().is_empty()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn write_point(
        &self,
        measurement: &str,
        value: &TopicValue,
        timestamp_nanos: i64,
    ) -> Result<(), StoreError> {
        self.insert(measurement, value.clone(), timestamp_nanos / 1_000_000);
        Ok(())
    }

    async fn query_range(
        &self,
        topic: &str,
        lookback: Duration,
    ) -> Result<Vec<StorePoint>, StoreError> {
        let start = window_start_ms(current_timestamp_ms(), lookback);
        let mut points: Vec<StorePoint> = self
            .points
            .lock()
            .iter()
            .filter(|point| point.topic == topic && point.time >= start)
            .cloned()
            .collect();
        points.sort_by_key(|point| point.time);
        Ok(points)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
