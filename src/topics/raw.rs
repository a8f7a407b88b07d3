//! Raw topic registry - entry point for every inbound bus message
//!
//! Keeps one `RawTopic` per distinct, non-excluded topic name with a
//! newest-first history. History is bounded by a periodic sweep (see
//! `scheduler::history_sweep_task`), not on every write:
//!
//! - entries older than `max_age_ms` are dropped
//! - the history is truncated to the `max_count` newest entries
//! - the newest entry always survives, even when it is stale
//!
//! Listeners subscribe per topic name and are invoked synchronously, in
//! registration order, whenever `ingest` changes that topic's latest value.

use super::exclude::ExcludeList;
use super::types::{current_timestamp_ms, topic_hash, HistoryEntry, TopicValue};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Observer for raw topic updates
pub trait TopicListener: Send + Sync {
    /// Called after `topic` received a new latest value
    fn on_topic_update(&self, topic: &str, value: &TopicValue);
}

/// Function-based listener for simple cases
pub struct FnListener<F: Fn(&str, &TopicValue) + Send + Sync>(pub F);

impl<F: Fn(&str, &TopicValue) + Send + Sync> TopicListener for FnListener<F> {
    fn on_topic_update(&self, topic: &str, value: &TopicValue) {
        (self.0)(topic, value);
    }
}

/// Handle returned by `subscribe`, used to detach a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Result of ingesting one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Topic name is on the exclude list; nothing happened
    Excluded,
    /// First message for this name; a new RawTopic was created
    Added,
    /// Existing RawTopic received a new value
    Updated,
}

/// History bounds; `None` disables a bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HistoryLimits {
    pub max_age_ms: Option<i64>,
    pub max_count: Option<usize>,
}

impl HistoryLimits {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Build limits from the `-1 disables` convention used in configuration
    ///
    /// `max_age_secs` is in seconds.
    pub fn from_settings(max_age_secs: i64, max_count: i64) -> Self {
        Self {
            max_age_ms: (max_age_secs >= 0).then(|| max_age_secs.saturating_mul(1000)),
            max_count: (max_count >= 0).then_some(max_count as usize),
        }
    }
}

/// One bus topic with its retained history
#[derive(Debug, Clone)]
pub struct RawTopic {
    name: String,
    hash: String,
    history: VecDeque<HistoryEntry>,
}

impl RawTopic {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            hash: topic_hash(&name),
            name,
            history: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Latest value, if any
    pub fn value(&self) -> Option<&TopicValue> {
        self.history.front().map(|entry| &entry.value)
    }

    /// Timestamp of the latest value
    pub fn last_updated(&self) -> Option<i64> {
        self.history.front().map(|entry| entry.timestamp)
    }

    /// History, newest first
    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Record a live value as the newest entry
    ///
    /// Timestamps are clamped so the history stays newest-first even if the
    /// clock steps backwards.
    fn push_latest(&mut self, value: TopicValue, timestamp: i64) {
        let timestamp = match self.history.front() {
            Some(newest) if newest.timestamp > timestamp => newest.timestamp,
            _ => timestamp,
        };
        self.history.push_front(HistoryEntry { value, timestamp });
    }

    /// Insert a historical value at its timestamp position
    fn insert_ordered(&mut self, value: TopicValue, timestamp: i64) {
        let position = self
            .history
            .iter()
            .position(|entry| entry.timestamp < timestamp)
            .unwrap_or(self.history.len());
        self.history.insert(position, HistoryEntry { value, timestamp });
    }

    /// Apply age and count bounds, always keeping the newest entry
    pub fn evict(&mut self, limits: &HistoryLimits, now: i64) {
        let newest = self.history.front().cloned();

        if let Some(max_age_ms) = limits.max_age_ms {
            let cutoff = now - max_age_ms;
            self.history.retain(|entry| entry.timestamp > cutoff);
        }

        if let Some(max_count) = limits.max_count {
            self.history.truncate(max_count);
        }

        if self.history.is_empty() {
            if let Some(newest) = newest {
                self.history.push_back(newest);
            }
        }
    }
}

/// Snapshot entry for one raw topic, persisted as the `topics` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTopicDeclaration {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<TopicValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Registry of all raw topics seen on the bus
pub struct RawTopicRegistry {
    topics: HashMap<String, RawTopic>,
    excludes: ExcludeList,
    limits: HistoryLimits,
    listeners: HashMap<String, Vec<(SubscriptionId, Arc<dyn TopicListener>)>>,
    next_subscription: u64,

    /// Timestamp function (for testing with mock time)
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl RawTopicRegistry {
    /// Create a registry using the system clock
    pub fn new(excludes: ExcludeList, limits: HistoryLimits) -> Self {
        Self::new_with_timestamp_fn(excludes, limits, Box::new(current_timestamp_ms))
    }

    /// Create a registry with a custom clock returning Unix milliseconds
    pub fn new_with_timestamp_fn(
        excludes: ExcludeList,
        limits: HistoryLimits,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        Self {
            topics: HashMap::new(),
            excludes,
            limits,
            listeners: HashMap::new(),
            next_subscription: 0,
            now_fn,
        }
    }

    /// Ingest one bus message
    ///
    /// Excluded names are dropped silently. Otherwise the topic is created or
    /// updated and its listeners are notified in registration order.
    pub fn ingest(&mut self, name: &str, payload: &str) -> IngestOutcome {
        if self.excludes.contains(name) {
            log::trace!("Dropping excluded topic {}", name);
            return IngestOutcome::Excluded;
        }

        let value = TopicValue::parse(payload);
        let now = (self.now_fn)();

        let outcome = match self.topics.get_mut(name) {
            Some(topic) => {
                topic.push_latest(value.clone(), now);
                IngestOutcome::Updated
            }
            None => {
                let mut topic = RawTopic::new(name);
                topic.push_latest(value.clone(), now);
                self.topics.insert(name.to_string(), topic);
                log::debug!("➕ Topic added: {} = {}", name, value);
                IngestOutcome::Added
            }
        };

        self.notify(name, &value);
        outcome
    }

    /// Insert a historical value (persisted snapshot or store) without
    /// notifying listeners
    ///
    /// Returns false for excluded names.
    pub fn seed(&mut self, name: &str, value: TopicValue, timestamp: i64) -> bool {
        if self.excludes.contains(name) {
            return false;
        }
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| RawTopic::new(name))
            .insert_ordered(value, timestamp);
        true
    }

    /// Latest value of a topic
    pub fn get(&self, name: &str) -> Option<&TopicValue> {
        self.topics.get(name).and_then(|topic| topic.value())
    }

    pub fn topic(&self, name: &str) -> Option<&RawTopic> {
        self.topics.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.topics.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Attach a listener to a topic name (the topic need not exist yet)
    pub fn subscribe(&mut self, name: &str, listener: Arc<dyn TopicListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners
            .entry(name.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    /// Detach a listener; returns false if the id was unknown
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let mut removed = false;
        self.listeners.retain(|_, listeners| {
            let before = listeners.len();
            listeners.retain(|(existing, _)| *existing != id);
            removed |= listeners.len() != before;
            !listeners.is_empty()
        });
        removed
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.get(name).map_or(0, |listeners| listeners.len())
    }

    fn notify(&self, name: &str, value: &TopicValue) {
        let Some(listeners) = self.listeners.get(name) else {
            return;
        };
        for (_, listener) in listeners {
            listener.on_topic_update(name, value);
        }
    }

    /// Sweep all histories using the registry clock
    pub fn sweep(&mut self) {
        let now = (self.now_fn)();
        self.sweep_at(now);
    }

    /// Sweep all histories against an explicit `now` (Unix milliseconds)
    pub fn sweep_at(&mut self, now: i64) {
        let limits = self.limits;
        for topic in self.topics.values_mut() {
            topic.evict(&limits, now);
        }
    }

    pub fn limits(&self) -> &HistoryLimits {
        &self.limits
    }

    pub fn excludes(&self) -> &ExcludeList {
        &self.excludes
    }

    /// Add a name to the exclude list
    ///
    /// An existing RawTopic is kept as it is; only further updates stop.
    pub fn exclude(&mut self, name: &str) -> bool {
        self.excludes.add(name)
    }

    pub fn include(&mut self, name: &str) -> bool {
        self.excludes.remove(name)
    }

    /// Latest value of every topic, sorted by name
    pub fn declarations(&self) -> Vec<RawTopicDeclaration> {
        let mut declarations: Vec<RawTopicDeclaration> = self
            .topics
            .values()
            .map(|topic| RawTopicDeclaration {
                topic: topic.name.clone(),
                value: topic.value().cloned(),
                timestamp: topic.last_updated(),
                hash: Some(topic.hash.clone()),
            })
            .collect();
        declarations.sort_by(|a, b| a.topic.cmp(&b.topic));
        declarations
    }

    /// Seed the registry from a persisted snapshot; returns how many topics
    /// received a value
    pub fn restore(&mut self, declarations: Vec<RawTopicDeclaration>) -> usize {
        let now = (self.now_fn)();
        let mut restored = 0;
        for declaration in declarations {
            let Some(value) = declaration.value else {
                continue;
            };
            let timestamp = declaration.timestamp.unwrap_or(now);
            if self.seed(&declaration.topic, value, timestamp) {
                restored += 1;
            }
        }
        restored
    }
}
