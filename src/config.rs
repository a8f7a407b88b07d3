//! Runtime configuration from environment variables
//!
//! Environment variables:
//! - `BUS_URL` (default: mqtt://localhost:1883)
//! - `BUS_CLIENT_ID` (default: topicflow)
//! - `BUS_SUBSCRIBE_PATTERN` (default: #)
//! - `TOPIC_MAX_HISTORY_LENGTH` (default: -1, unbounded)
//! - `TOPIC_MAX_HISTORY_AGE` seconds (default: -1, unbounded)
//! - `HISTORY_SWEEP_INTERVAL_MS` (default: 500)
//! - `DEFINITIONS_DIR` (default: config)
//! - `SNAPSHOT_INTERVAL_SECS` (default: 60)
//! - `STORE_BACKEND` sqlite | influx | none (default: sqlite)
//! - `STORE_DB_PATH` (default: data/topicflow.db)
//! - `INFLUXDB_URL`, `INFLUXDB_TOKEN`, `INFLUXDB_ORG`, `INFLUXDB_BUCKET`
//!   (required when `STORE_BACKEND=influx`)
//! - `STORE_ARCHIVE_PREFIX` (default: unset, nothing is archived)
//! - `BOOTSTRAP_LOOKBACK_SECS` (default: 86400)
//! - `STORE_QUERY_TIMEOUT_MS` (default: 5000)

use std::env;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct InfluxSettings {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Sqlite { db_path: String },
    Influx(InfluxSettings),
    None,
}

impl StoreBackend {
    pub fn name(&self) -> &'static str {
        match self {
            StoreBackend::Sqlite { .. } => "sqlite",
            StoreBackend::Influx(_) => "influx",
            StoreBackend::None => "none",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub bus_url: String,
    pub bus_client_id: String,
    pub subscribe_pattern: String,
    pub max_history_length: i64,
    pub max_history_age_secs: i64,
    pub sweep_interval_ms: u64,
    pub definitions_dir: String,
    pub snapshot_interval_secs: u64,
    pub store: StoreBackend,
    pub archive_prefix: Option<String>,
    pub bootstrap_lookback_secs: u64,
    pub store_query_timeout_ms: u64,
}

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key → value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let bus_url = var("BUS_URL").unwrap_or_else(|| "mqtt://localhost:1883".to_string());
        if !["mqtt://", "tcp://"].iter().any(|scheme| bus_url.starts_with(scheme)) {
            return Err(ConfigError::InvalidValue(
                "BUS_URL must start with mqtt:// or tcp://".to_string(),
            ));
        }

        let bus_client_id = var("BUS_CLIENT_ID").unwrap_or_else(|| "topicflow".to_string());
        let subscribe_pattern = var("BUS_SUBSCRIBE_PATTERN").unwrap_or_else(|| "#".to_string());

        let max_history_length = var("TOPIC_MAX_HISTORY_LENGTH")
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(-1);

        let max_history_age_secs = var("TOPIC_MAX_HISTORY_AGE")
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(-1);

        let sweep_interval_ms = var("HISTORY_SWEEP_INTERVAL_MS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(500);

        let definitions_dir = var("DEFINITIONS_DIR").unwrap_or_else(|| "config".to_string());

        let snapshot_interval_secs = var("SNAPSHOT_INTERVAL_SECS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(60);

        let backend = var("STORE_BACKEND").unwrap_or_else(|| "sqlite".to_string());
        let store = match backend.to_lowercase().as_str() {
            "sqlite" => StoreBackend::Sqlite {
                db_path: var("STORE_DB_PATH").unwrap_or_else(|| "data/topicflow.db".to_string()),
            },
            "influx" | "influxdb" => {
                let required = |key: &str| {
                    var(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
                };
                StoreBackend::Influx(InfluxSettings {
                    url: required("INFLUXDB_URL")?,
                    token: required("INFLUXDB_TOKEN")?,
                    org: required("INFLUXDB_ORG")?,
                    bucket: required("INFLUXDB_BUCKET")?,
                })
            }
            "none" => StoreBackend::None,
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "STORE_BACKEND must be sqlite, influx or none, got '{}'",
                    other
                )))
            }
        };

        let archive_prefix = var("STORE_ARCHIVE_PREFIX");

        let bootstrap_lookback_secs = var("BOOTSTRAP_LOOKBACK_SECS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(86_400);

        let store_query_timeout_ms = var("STORE_QUERY_TIMEOUT_MS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(5_000);

        Ok(Self {
            bus_url,
            bus_client_id,
            subscribe_pattern,
            max_history_length,
            max_history_age_secs,
            sweep_interval_ms,
            definitions_dir,
            snapshot_interval_secs,
            store,
            archive_prefix,
            bootstrap_lookback_secs,
            store_query_timeout_ms,
        })
    }

    pub fn bootstrap_lookback(&self) -> Duration {
        Duration::from_secs(self.bootstrap_lookback_secs)
    }

    pub fn store_query_timeout(&self) -> Duration {
        Duration::from_millis(self.store_query_timeout_ms)
    }
}
