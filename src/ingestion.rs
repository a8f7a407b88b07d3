//! Message loop - feeds bus messages into the engine
//!
//! One message at a time: the engine lock is taken once per message and
//! released before the store write, so archiving never holds up the
//! schedulers.

use crate::bus::BusSubscription;
use crate::engine::TopicEngine;
use crate::store::Store;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Interval between throughput log lines
const RATE_LOG_INTERVAL_SECS: u64 = 60;

/// Run until the subscription closes
///
/// Arguments:
/// - `subscription`: inbound messages (normally `#`)
/// - `engine`: shared engine
/// - `store`: archive target; `None` disables archiving
///
/// Returns the number of messages processed.
pub async fn run_message_loop(
    mut subscription: BusSubscription,
    engine: Arc<Mutex<TopicEngine>>,
    store: Option<Arc<dyn Store>>,
) -> u64 {
    log::info!("🚀 Starting message loop");
    log::info!("   ├─ Pattern: {}", subscription.pattern());
    log::info!(
        "   └─ Archive: {}",
        store.as_ref().map_or("disabled", |s| s.backend_type())
    );

    let mut total = 0u64;
    let mut window_count = 0u64;
    let mut window_start = Instant::now();

    while let Some(message) = subscription.recv().await {
        let archive = {
            let mut engine = engine.lock();
            engine.handle_message(&message.topic, &message.payload)
        };

        if let (Some(point), Some(store)) = (archive, store.as_ref()) {
            if let Err(e) = store
                .write_point(&point.measurement, &point.value, point.timestamp_nanos)
                .await
            {
                log::error!("❌ Failed to archive {}: {}", point.measurement, e);
            }
        }

        total += 1;
        window_count += 1;

        if window_start.elapsed().as_secs() >= RATE_LOG_INTERVAL_SECS {
            let rate = window_count as f64 / window_start.elapsed().as_secs_f64();
            log::info!("📊 Ingestion rate: {:.1} msg/sec (total: {})", rate, total);
            window_start = Instant::now();
            window_count = 0;
        }
    }

    log::warn!("⚠️  Bus subscription closed, stopping message loop");
    total
}
