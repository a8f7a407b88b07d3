use super::{Bus, BusMessage, BusResult, BusSubscription, BUS_CHANNEL_CAPACITY};
use tokio::sync::broadcast;

/// In-memory bus for tests and single-process deployments
///
/// Every subscription sees every publish that matches its filter, including
/// publishes made by the engine itself.
pub struct LocalBus {
    sender: broadcast::Sender<BusMessage>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for LocalBus {
    fn subscribe(&self, pattern: &str) -> BusResult<BusSubscription> {
        Ok(BusSubscription::new(pattern, self.sender.subscribe()))
    }

    fn publish(&self, topic: &str, payload: &str) -> BusResult<()> {
        // No subscribers is not an error: the message is simply not delivered
        let _ = self.sender.send(BusMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    fn bus_type(&self) -> &'static str {
        "local"
    }
}
