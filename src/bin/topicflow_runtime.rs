//! topicflow runtime
//!
//! Connects to the MQTT bus, restores raw topics and derived topic
//! declarations, reconciles derived topics with the store and then processes
//! bus messages until CTRL+C.
//!
//! Usage:
//!   cargo run --release --bin topicflow_runtime
//!
//! Configuration comes from environment variables (and `.env`); see
//! `topicflow::config` for the full list.

use dotenv::dotenv;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use topicflow::bus::{Bus, MqttBus};
use topicflow::config::{RuntimeConfig, StoreBackend};
use topicflow::definitions::{DefinitionStorage, FileDefinitionStorage};
use topicflow::engine::TopicEngine;
use topicflow::ingestion::run_message_loop;
use topicflow::scheduler::{history_sweep_task, snapshot_task};
use topicflow::store::{InfluxStore, SqliteStore, Store};
use topicflow::topics::HistoryLimits;

fn open_store(backend: &StoreBackend) -> Result<Option<Arc<dyn Store>>, Box<dyn std::error::Error>> {
    let store: Option<Arc<dyn Store>> = match backend {
        StoreBackend::Sqlite { db_path } => Some(Arc::new(SqliteStore::open(db_path)?)),
        StoreBackend::Influx(settings) => Some(Arc::new(InfluxStore::new(
            &settings.url,
            &settings.token,
            &settings.org,
            &settings.bucket,
        )?)),
        StoreBackend::None => None,
    };
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 topicflow runtime");

    let config = RuntimeConfig::from_env()?;

    info!("✅ Configuration loaded");
    info!("   ├─ Bus: {} (client id: {})", config.bus_url, config.bus_client_id);
    info!("   ├─ Subscribe: {}", config.subscribe_pattern);
    info!(
        "   ├─ History: max length {}, max age {}s, sweep every {}ms",
        config.max_history_length, config.max_history_age_secs, config.sweep_interval_ms
    );
    info!("   ├─ Definitions: {}", config.definitions_dir);
    info!("   ├─ Store: {}", config.store.name());
    info!(
        "   ├─ Archive prefix: {}",
        config.archive_prefix.as_deref().unwrap_or("(none)")
    );
    info!(
        "   └─ Bootstrap lookback: {}s, query timeout: {}ms",
        config.bootstrap_lookback_secs, config.store_query_timeout_ms
    );

    // Store
    let store = open_store(&config.store)?;
    if let Some(store) = &store {
        info!("✅ Store ready ({})", store.backend_type());
    }

    // Bus
    let bus: Arc<dyn Bus> = Arc::new(MqttBus::connect(&config.bus_url, &config.bus_client_id)?);
    let subscription = bus.subscribe(&config.subscribe_pattern)?;
    info!("✅ Bus ready ({})", bus.bus_type());

    // Engine
    let storage: Arc<dyn DefinitionStorage> =
        Arc::new(FileDefinitionStorage::new(&config.definitions_dir));
    let limits = HistoryLimits::from_settings(config.max_history_age_secs, config.max_history_length);
    let mut engine = TopicEngine::new(bus.clone(), storage, limits);
    engine.set_archive_prefix(config.archive_prefix.clone());

    match engine.restore_snapshot() {
        Ok(count) => info!("✅ Restored {} raw topics", count),
        Err(e) => warn!("⚠️  Could not restore topic snapshot: {}", e),
    }
    match engine.load_declarations() {
        Ok(count) => info!("✅ Declared {} derived topics", count),
        Err(e) => warn!("⚠️  Could not load derived topic declarations: {}", e),
    }

    let report = engine
        .bootstrap(
            store.clone(),
            config.bootstrap_lookback(),
            config.store_query_timeout(),
        )
        .await;
    info!(
        "✅ Bootstrap: {} queried, {} seeded, {} failed",
        report.queried, report.seeded, report.failed
    );

    let engine = Arc::new(Mutex::new(engine));

    // Background tasks
    info!("🚀 Spawning background tasks...");

    let sweep_handle = tokio::spawn(history_sweep_task(engine.clone(), config.sweep_interval_ms));
    info!("   ├─ ✅ History sweep");

    let snapshot_handle = tokio::spawn(snapshot_task(engine.clone(), config.snapshot_interval_secs));
    info!("   ├─ ✅ Snapshot autosave");

    let loop_engine = engine.clone();
    let mut loop_handle = tokio::spawn(run_message_loop(subscription, loop_engine, store));
    info!("   └─ ✅ Message loop");

    info!("🔄 Press CTRL+C to shutdown gracefully");

    let interrupted = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
                Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
            }
            true
        }
        result = &mut loop_handle => {
            match result {
                Ok(total) => warn!("⚠️  Message loop ended after {} messages", total),
                Err(e) => error!("❌ Message loop failed: {}", e),
            }
            false
        }
    };

    if interrupted {
        loop_handle.abort();
    }
    sweep_handle.abort();
    snapshot_handle.abort();

    // Final snapshot
    let result = engine.lock().save_snapshot();
    match result {
        Ok(count) => info!("💾 Final snapshot saved ({} topics)", count),
        Err(e) => error!("❌ Failed to save final snapshot: {}", e),
    }

    info!("✅ topicflow runtime stopped");
    Ok(())
}
