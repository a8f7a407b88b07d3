//! MQTT transport
//!
//! A background task drives the rumqttc event loop and fans incoming
//! publishes out to every `BusSubscription` through a broadcast channel.
//! Filters are re-subscribed on every (re)connect.

use super::{Bus, BusError, BusMessage, BusResult, BusSubscription, BUS_CHANNEL_CAPACITY};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const DEFAULT_MQTT_PORT: u16 = 1883;
const CLIENT_REQUEST_CAPACITY: usize = 1024;
const KEEP_ALIVE_SECS: u64 = 30;
const RECONNECT_DELAY_SECS: u64 = 2;

pub struct MqttBus {
    client: AsyncClient,
    sender: broadcast::Sender<BusMessage>,
    filters: Arc<Mutex<Vec<String>>>,
}

/// Split `mqtt://host:port` (or `tcp://`, or bare `host[:port]`)
pub fn parse_broker_url(url: &str) -> BusResult<(String, u16)> {
    let rest = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url)
        .trim_end_matches('/');

    if rest.is_empty() {
        return Err(BusError::InvalidUrl(url.to_string()));
    }

    match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| BusError::InvalidUrl(url.to_string()))?;
            if host.is_empty() {
                return Err(BusError::InvalidUrl(url.to_string()));
            }
            Ok((host.to_string(), port))
        }
        None => Ok((rest.to_string(), DEFAULT_MQTT_PORT)),
    }
}

impl MqttBus {
    /// Connect to a broker and start the event loop task
    ///
    /// Must be called from within a tokio runtime. The connection itself is
    /// established lazily by the event loop; failures are logged and retried.
    pub fn connect(url: &str, client_id: &str) -> BusResult<Self> {
        let (host, port) = parse_broker_url(url)?;

        let mut options = MqttOptions::new(client_id, host.clone(), port);
        options.set_keep_alive(Duration::from_secs(KEEP_ALIVE_SECS));

        let (client, mut event_loop) = AsyncClient::new(options, CLIENT_REQUEST_CAPACITY);
        let (sender, _) = broadcast::channel(BUS_CHANNEL_CAPACITY);
        let filters: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let task_sender = sender.clone();
        let task_client = client.clone();
        let task_filters = filters.clone();

        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        log::info!("✅ Connected to MQTT broker {}:{}", host, port);
                        let filters = task_filters.lock().clone();
                        for filter in filters {
                            if let Err(e) = task_client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
                                log::warn!("⚠️  Failed to resubscribe {}: {}", filter, e);
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                        let _ = task_sender.send(BusMessage {
                            topic: publish.topic.clone(),
                            payload,
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("❌ MQTT connection error: {}", e);
                        tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
                    }
                }
            }
        });

        Ok(Self {
            client,
            sender,
            filters,
        })
    }
}

impl Bus for MqttBus {
    fn subscribe(&self, pattern: &str) -> BusResult<BusSubscription> {
        // Receiver first so nothing delivered after SUBSCRIBE is missed
        let receiver = self.sender.subscribe();

        {
            let mut filters = self.filters.lock();
            if !filters.iter().any(|existing| existing == pattern) {
                filters.push(pattern.to_string());
            }
        }

        self.client
            .try_subscribe(pattern, QoS::AtMostOnce)
            .map_err(|e| BusError::Transport(e.to_string()))?;

        Ok(BusSubscription::new(pattern, receiver))
    }

    fn publish(&self, topic: &str, payload: &str) -> BusResult<()> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| BusError::Transport(e.to_string()))
    }

    fn bus_type(&self) -> &'static str {
        "mqtt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_url() {
        assert_eq!(
            parse_broker_url("mqtt://localhost:1883").unwrap(),
            ("localhost".to_string(), 1883)
        );
        assert_eq!(
            parse_broker_url("tcp://broker.lan:11883/").unwrap(),
            ("broker.lan".to_string(), 11883)
        );
        assert_eq!(
            parse_broker_url("broker.lan").unwrap(),
            ("broker.lan".to_string(), 1883)
        );
    }

    #[test]
    fn test_parse_broker_url_invalid() {
        assert!(parse_broker_url("mqtt://").is_err());
        assert!(parse_broker_url("mqtt://host:notaport").is_err());
        assert!(parse_broker_url("mqtt://:1883").is_err());
    }
}
