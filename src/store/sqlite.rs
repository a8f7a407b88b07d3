use super::{window_start_ms, Store, StoreError, StorePoint};
use crate::topics::types::{current_timestamp_ms, TopicValue};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use std::time::Duration;

/// Local SQLite point store
///
/// Numbers go to `num_value`, everything else to `text_value`; exactly one
/// of the two is set per row.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Database(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS points (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                measurement TEXT NOT NULL,
                num_value REAL,
                text_value TEXT,
                timestamp_ms INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_measurement_time ON points(measurement, timestamp_ms)",
            [],
        )?;

        log::info!("✅ SQLite store initialized");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn point_count(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        let count = conn.query_row("SELECT COUNT(*) FROM points", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn write_point(
        &self,
        measurement: &str,
        value: &TopicValue,
        timestamp_nanos: i64,
    ) -> Result<(), StoreError> {
        let (num_value, text_value) = match value {
            TopicValue::Number(n) => (Some(*n), None),
            TopicValue::Text(s) => (None, Some(s.as_str())),
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO points (measurement, num_value, text_value, timestamp_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![measurement, num_value, text_value, timestamp_nanos / 1_000_000],
        )?;
        Ok(())
    }

    async fn query_range(
        &self,
        topic: &str,
        lookback: Duration,
    ) -> Result<Vec<StorePoint>, StoreError> {
        let start = window_start_ms(current_timestamp_ms(), lookback);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT num_value, text_value, timestamp_ms FROM points
             WHERE measurement = ?1 AND timestamp_ms >= ?2
             ORDER BY timestamp_ms ASC, id ASC",
        )?;

        let rows = stmt.query_map(params![topic, start], |row| {
            let num_value: Option<f64> = row.get(0)?;
            let text_value: Option<String> = row.get(1)?;
            let time: i64 = row.get(2)?;
            Ok((num_value, text_value, time))
        })?;

        let mut points = Vec::new();
        for row in rows {
            let (num_value, text_value, time) = row?;
            let value = match (num_value, text_value) {
                (Some(n), _) => TopicValue::Number(n),
                (None, Some(s)) => TopicValue::Text(s),
                (None, None) => continue,
            };
            points.push(StorePoint {
                topic: topic.to_string(),
                time,
                value,
            });
        }
        Ok(points)
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}
