//! Source specifications and bindings for derived topics
//!
//! A derived topic declares its sources in one of three shapes, inferred from
//! the JSON type of the declared value:
//!
//! ```json
//! "sensors/humidity"                                      // single
//! ["sensors/a/temperature", "sensors/b/temperature"]      // list
//! { "humidity": "sensors/humidity", "temperature": "…" }  // fields
//! ```
//!
//! The binding flattens the spec into the set of watched topic names and
//! caches the latest value of each one.

use super::types::TopicValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Declared source shape of a derived topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceSpec {
    Single(String),
    List(Vec<String>),
    Fields(BTreeMap<String, String>),
}

/// Binding type name derived from the spec shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Single,
    List,
    Fields,
}

impl SourceSpec {
    pub fn kind(&self) -> BindingKind {
        match self {
            SourceSpec::Single(_) => BindingKind::Single,
            SourceSpec::List(_) => BindingKind::List,
            SourceSpec::Fields(_) => BindingKind::Fields,
        }
    }

    /// Flatten the spec into topic names
    ///
    /// Order follows the declaration (field order is alphabetical by field
    /// name); duplicates are removed.
    pub fn resolve(&self) -> Vec<String> {
        let topics: Vec<&String> = match self {
            SourceSpec::Single(topic) => vec![topic],
            SourceSpec::List(topics) => topics.iter().collect(),
            SourceSpec::Fields(fields) => fields.values().collect(),
        };

        let mut resolved: Vec<String> = Vec::with_capacity(topics.len());
        for topic in topics {
            if !resolved.contains(topic) {
                resolved.push(topic.clone());
            }
        }
        resolved
    }
}

impl Default for SourceSpec {
    fn default() -> Self {
        SourceSpec::List(Vec::new())
    }
}

/// Live view of a derived topic's sources
#[derive(Debug, Clone)]
pub struct SourceBinding {
    spec: SourceSpec,
    watched: Vec<String>,
    values: HashMap<String, TopicValue>,
}

impl SourceBinding {
    /// Create a binding, seeding values through `lookup` (usually the raw
    /// registry's latest value)
    pub fn new<F>(spec: SourceSpec, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<TopicValue>,
    {
        let mut binding = Self {
            watched: Vec::new(),
            spec: SourceSpec::default(),
            values: HashMap::new(),
        };
        binding.update(spec, lookup);
        binding
    }

    /// Replace the spec, keeping already-learned values
    ///
    /// Newly watched topics without a cached value are seeded through
    /// `lookup`. Values of topics that are no longer watched stay in the
    /// cache; they are never read again.
    pub fn update<F>(&mut self, spec: SourceSpec, lookup: F)
    where
        F: Fn(&str) -> Option<TopicValue>,
    {
        self.watched = spec.resolve();
        self.spec = spec;

        for topic in &self.watched {
            if self.values.contains_key(topic) {
                continue;
            }
            if let Some(value) = lookup(topic) {
                self.values.insert(topic.clone(), value);
            }
        }
    }

    /// Record a new value for a watched topic
    ///
    /// Returns true when the owner has to recompute; unwatched topics are
    /// ignored.
    pub fn set_value(&mut self, topic: &str, value: TopicValue) -> bool {
        if !self.watches(topic) {
            return false;
        }
        self.values.insert(topic.to_string(), value);
        true
    }

    /// Store a bootstrap value without asking for a recompute
    ///
    /// Live values win: an existing entry is not overwritten.
    pub fn seed_value(&mut self, topic: &str, value: TopicValue) -> bool {
        if !self.watches(topic) || self.values.contains_key(topic) {
            return false;
        }
        self.values.insert(topic.to_string(), value);
        true
    }

    /// Drop every learned value
    pub fn reset(&mut self) {
        self.values.clear();
    }

    pub fn watches(&self, topic: &str) -> bool {
        self.watched.iter().any(|watched| watched == topic)
    }

    pub fn spec(&self) -> &SourceSpec {
        &self.spec
    }

    pub fn kind(&self) -> BindingKind {
        self.spec.kind()
    }

    pub fn watched_topics(&self) -> &[String] {
        &self.watched
    }

    /// Latest cached value of a watched topic
    pub fn value(&self, topic: &str) -> Option<&TopicValue> {
        self.values.get(topic)
    }

    /// Value of a named field (fields bindings only)
    pub fn field_value(&self, field: &str) -> Option<&TopicValue> {
        match &self.spec {
            SourceSpec::Fields(fields) => fields.get(field).and_then(|topic| self.values.get(topic)),
            _ => None,
        }
    }

    /// Watched topics that still lack a value
    pub fn missing_topics(&self) -> Vec<String> {
        self.watched
            .iter()
            .filter(|topic| !self.values.contains_key(*topic))
            .cloned()
            .collect()
    }

    /// Number of cached values (including stale, unwatched ones)
    pub fn cached_len(&self) -> usize {
        self.values.len()
    }
}
