//! Time-series store for archived topic values
//!
//! The store is used in two directions:
//! - archiving: inbound messages under the configured prefix are written as
//!   points (one measurement per topic, field `value`)
//! - bootstrap: at startup, derived topics ask for the latest point of each
//!   source topic that has no value yet
//!
//! Backends: `SqliteStore` (local file), `InfluxStore` (InfluxDB v2 HTTP API)
//! and `MemoryStore` (tests, embedded use).

pub mod influx;
pub mod memory;
pub mod sqlite;

use crate::topics::types::TopicValue;
use async_trait::async_trait;
use std::time::Duration;

pub use influx::InfluxStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug)]
pub enum StoreError {
    Database(String),
    Http(String),
    Parse(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Http(err.to_string())
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Http(e) => write!(f, "HTTP error: {}", e),
            StoreError::Parse(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// One stored reading
#[derive(Debug, Clone, PartialEq)]
pub struct StorePoint {
    pub topic: String,
    /// Unix milliseconds
    pub time: i64,
    pub value: TopicValue,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Write one point; `timestamp_nanos` is Unix nanoseconds
    async fn write_point(
        &self,
        measurement: &str,
        value: &TopicValue,
        timestamp_nanos: i64,
    ) -> Result<(), StoreError>;

    /// Points of one topic newer than `now - lookback`, oldest first
    async fn query_range(&self, topic: &str, lookback: Duration)
        -> Result<Vec<StorePoint>, StoreError>;

    /// Most recent point inside the lookback window
    async fn last_point(
        &self,
        topic: &str,
        lookback: Duration,
    ) -> Result<Option<StorePoint>, StoreError> {
        Ok(self.query_range(topic, lookback).await?.pop())
    }

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// Start of a lookback window in Unix milliseconds
pub(crate) fn window_start_ms(now_ms: i64, lookback: Duration) -> i64 {
    now_ms.saturating_sub(i64::try_from(lookback.as_millis()).unwrap_or(i64::MAX))
}
