//! Message bus abstraction
//!
//! The engine consumes inbound messages through a `BusSubscription` and
//! publishes derived values with `Bus::publish`. Publishing is synchronous
//! and non-blocking so it can happen while the engine lock is held; a
//! derived topic's own publish comes back through the subscription like any
//! other message.
//!
//! Two transports exist:
//! - `LocalBus`: in-process broadcast channel (tests, embedded use)
//! - `MqttBus`: MQTT broker via rumqttc

pub mod local;
pub mod mqtt;

use std::fmt;
use tokio::sync::broadcast;

pub use local::LocalBus;
pub use mqtt::MqttBus;

/// Capacity of the broadcast channel feeding subscriptions
pub const BUS_CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

#[derive(Debug)]
pub enum BusError {
    /// The transport shut down
    Closed,
    /// Broker or client error
    Transport(String),
    /// Malformed connection URL
    InvalidUrl(String),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Closed => write!(f, "Bus channel closed"),
            BusError::Transport(e) => write!(f, "Bus transport error: {}", e),
            BusError::InvalidUrl(url) => write!(f, "Invalid bus URL: {}", url),
        }
    }
}

impl std::error::Error for BusError {}

pub type BusResult<T> = Result<T, BusError>;

/// Publish/subscribe transport
pub trait Bus: Send + Sync {
    /// Subscribe to an MQTT-style topic filter (`+` and `#` wildcards)
    fn subscribe(&self, pattern: &str) -> BusResult<BusSubscription>;

    /// Publish a UTF-8 payload; must not block
    fn publish(&self, topic: &str, payload: &str) -> BusResult<()>;

    /// Get bus type name (for logging)
    fn bus_type(&self) -> &'static str;
}

/// Stream of messages matching one topic filter
pub struct BusSubscription {
    pattern: String,
    receiver: broadcast::Receiver<BusMessage>,
}

impl BusSubscription {
    pub fn new(pattern: &str, receiver: broadcast::Receiver<BusMessage>) -> Self {
        Self {
            pattern: pattern.to_string(),
            receiver,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Next matching message; `None` once the transport is closed
    ///
    /// Messages dropped because this subscriber fell behind are logged and
    /// skipped.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => {
                    if topic_matches(&self.pattern, &message.topic) {
                        return Some(message);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("⚠️  Bus subscriber lagged, {} messages dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// MQTT topic filter matching
///
/// `+` matches exactly one level, a trailing `#` matches the remaining
/// levels (including none).
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (pattern_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
