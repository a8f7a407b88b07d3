//! Derived topics
//!
//! A derived topic owns a `SourceBinding` and at most one calculator. When a
//! watched source changes it recomputes, rounds numeric results to its
//! precision and publishes the value on the bus under its own name. It never
//! feeds other derived topics directly: the published value comes back from
//! the bus as a raw message and propagates from there.

use super::raw::TopicListener;
use super::source::{SourceBinding, SourceSpec};
use super::types::{round_significant, topic_hash, TopicValue};
use crate::bus::Bus;
use crate::calculators::{Calculator, CalculatorCatalog, CalculatorInput, CalculatorOptions};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default number of significant digits for numeric results
pub const DEFAULT_PRECISION: u32 = 4;

/// Persisted form of a derived topic
///
/// Unknown fields (`transform`, `max`, …) are kept in `extra`, handed to the
/// calculator as options and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedTopicDeclaration {
    pub topic: String,
    #[serde(default)]
    pub source: SourceSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(flatten)]
    pub extra: CalculatorOptions,
}

impl DerivedTopicDeclaration {
    pub fn new(topic: &str, source: SourceSpec, calculator: &str) -> Self {
        Self {
            topic: topic.to_string(),
            source,
            calculator: Some(calculator.to_string()),
            precision: None,
            extra: CalculatorOptions::new(),
        }
    }

    /// Builder-style option setter
    pub fn with_option(mut self, key: &str, value: serde_json::Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

/// Lifecycle of a derived topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicPhase {
    /// Declared, sources not yet reconciled with the store
    Declared,
    /// Store queries for missing sources are in flight
    Bootstrapping,
    /// Reacting to live updates
    Live,
}

pub struct DerivedTopic {
    name: String,
    hash: String,
    binding: SourceBinding,
    calculator: Option<Box<dyn Calculator>>,
    calculator_name: Option<String>,
    precision: u32,
    extra: CalculatorOptions,
    value: Option<TopicValue>,
    phase: TopicPhase,
    bus: Arc<dyn Bus>,
}

fn instantiate(topic: &str, name: Option<&str>, options: &CalculatorOptions) -> Option<Box<dyn Calculator>> {
    let name = name?;
    let calculator = CalculatorCatalog::create(name, options);
    if calculator.is_none() {
        log::warn!("⚠️  Unknown calculator '{}' for derived topic {}", name, topic);
    }
    calculator
}

impl DerivedTopic {
    /// Create from a declaration, seeding source values through `lookup`
    pub fn new<F>(declaration: DerivedTopicDeclaration, bus: Arc<dyn Bus>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<TopicValue>,
    {
        let calculator = instantiate(
            &declaration.topic,
            declaration.calculator.as_deref(),
            &declaration.extra,
        );

        Self {
            hash: topic_hash(&declaration.topic),
            binding: SourceBinding::new(declaration.source, lookup),
            calculator,
            calculator_name: declaration.calculator,
            precision: declaration.precision.unwrap_or(DEFAULT_PRECISION),
            extra: declaration.extra,
            value: None,
            phase: TopicPhase::Declared,
            name: declaration.topic,
            bus,
        }
    }

    /// Apply a new declaration for the same topic
    ///
    /// Same calculator name: the binding is updated in place and learned
    /// values survive. Different name: the calculator is replaced and the
    /// binding starts over from `lookup`.
    pub fn redeclare<F>(&mut self, declaration: DerivedTopicDeclaration, lookup: F)
    where
        F: Fn(&str) -> Option<TopicValue>,
    {
        if declaration.calculator == self.calculator_name {
            self.binding.update(declaration.source, lookup);
            if let Some(calculator) = self.calculator.as_mut() {
                calculator.reconfigure(&declaration.extra);
            }
        } else {
            log::info!(
                "🔄 Derived topic {} switches calculator {:?} → {:?}",
                self.name,
                self.calculator_name,
                declaration.calculator
            );
            self.calculator = instantiate(
                &self.name,
                declaration.calculator.as_deref(),
                &declaration.extra,
            );
            self.calculator_name = declaration.calculator;
            self.value = None;
            self.binding.reset();
            self.binding.update(declaration.source, lookup);
        }

        self.precision = declaration.precision.unwrap_or(DEFAULT_PRECISION);
        self.extra = declaration.extra;
    }

    /// Feed one source update; recomputes when the topic is watched
    pub fn on_source_update(&mut self, topic: &str, value: &TopicValue) -> Option<TopicValue> {
        if self.binding.set_value(topic, value.clone()) {
            self.recompute()
        } else {
            None
        }
    }

    /// Run the calculator and publish a successful result
    ///
    /// Returns the published value. Insufficient inputs or a missing
    /// calculator leave the previous value untouched.
    pub fn recompute(&mut self) -> Option<TopicValue> {
        let calculator = self.calculator.as_ref()?;
        let input = CalculatorInput::new(&self.name, &self.binding, &self.extra);

        let value = match calculator.calculate(&input)? {
            TopicValue::Number(n) => TopicValue::Number(round_significant(n, self.precision)),
            text => text,
        };

        self.value = Some(value.clone());

        let payload = value.to_string();
        log::debug!("📤 {} = {}", self.name, payload);
        if let Err(e) = self.bus.publish(&self.name, &payload) {
            log::warn!("⚠️  Failed to publish {}: {}", self.name, e);
        }

        Some(value)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Last successfully computed value
    pub fn value(&self) -> Option<&TopicValue> {
        self.value.as_ref()
    }

    pub fn binding(&self) -> &SourceBinding {
        &self.binding
    }

    pub fn binding_mut(&mut self) -> &mut SourceBinding {
        &mut self.binding
    }

    pub fn calculator_name(&self) -> Option<&str> {
        self.calculator_name.as_deref()
    }

    pub fn has_calculator(&self) -> bool {
        self.calculator.is_some()
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    pub fn phase(&self) -> TopicPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: TopicPhase) {
        self.phase = phase;
    }

    pub fn declaration(&self) -> DerivedTopicDeclaration {
        DerivedTopicDeclaration {
            topic: self.name.clone(),
            source: self.binding.spec().clone(),
            calculator: self.calculator_name.clone(),
            precision: (self.precision != DEFAULT_PRECISION).then_some(self.precision),
            extra: self.extra.clone(),
        }
    }
}

/// A derived topic shared between the registry and its raw-topic listeners
pub type SharedDerivedTopic = Arc<Mutex<DerivedTopic>>;

/// Raw registry listener forwarding updates into one derived topic
pub struct DerivedTopicListener {
    topic: SharedDerivedTopic,
}

impl DerivedTopicListener {
    pub fn new(topic: SharedDerivedTopic) -> Self {
        Self { topic }
    }
}

impl TopicListener for DerivedTopicListener {
    fn on_topic_update(&self, topic: &str, value: &TopicValue) {
        self.topic.lock().on_source_update(topic, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, BusResult, BusSubscription, LocalBus};
    use serde_json::json;

    /// Bus double that records publishes
    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<(String, String)>>,
    }

    impl Bus for RecordingBus {
        fn subscribe(&self, pattern: &str) -> BusResult<BusSubscription> {
            LocalBus::new().subscribe(pattern)
        }

        fn publish(&self, topic: &str, payload: &str) -> BusResult<()> {
            self.published
                .lock()
                .push((topic.to_string(), payload.to_string()));
            Ok(())
        }

        fn bus_type(&self) -> &'static str {
            "recording"
        }
    }

    fn no_lookup(_: &str) -> Option<TopicValue> {
        None
    }

    fn average_ab() -> DerivedTopicDeclaration {
        DerivedTopicDeclaration::new(
            "derived/avg",
            SourceSpec::List(vec!["A".into(), "B".into()]),
            "average",
        )
    }

    #[test]
    fn test_declaration_json_shape() {
        let declaration: DerivedTopicDeclaration = serde_json::from_value(json!({
            "topic": "derived/door",
            "source": "sensors/door",
            "calculator": "maptopic",
            "transform": "string-boolean"
        }))
        .unwrap();

        assert_eq!(declaration.source, SourceSpec::Single("sensors/door".into()));
        assert_eq!(declaration.precision, None);
        assert_eq!(declaration.extra.get("transform"), Some(&json!("string-boolean")));

        let back = serde_json::to_value(&declaration).unwrap();
        assert_eq!(back["transform"], json!("string-boolean"));
        assert!(back.get("precision").is_none());
    }

    #[test]
    fn test_recompute_publishes_rounded_value() {
        let bus = Arc::new(RecordingBus::default());
        let mut topic = DerivedTopic::new(average_ab(), bus.clone(), no_lookup);

        assert_eq!(topic.on_source_update("A", &TopicValue::Number(1.0)), None);
        assert!(bus.published.lock().is_empty());

        let value = topic.on_source_update("B", &TopicValue::Number(1.23456));
        assert_eq!(value, Some(TopicValue::Number(1.117)));
        assert_eq!(
            bus.published.lock().as_slice(),
            &[("derived/avg".to_string(), "1.117".to_string())]
        );
    }

    #[test]
    fn test_unwatched_update_is_ignored() {
        let bus = Arc::new(RecordingBus::default());
        let mut topic = DerivedTopic::new(average_ab(), bus.clone(), no_lookup);

        assert_eq!(topic.on_source_update("C", &TopicValue::Number(1.0)), None);
        assert_eq!(topic.binding().cached_len(), 0);
    }

    #[test]
    fn test_missing_input_keeps_previous_value() {
        let bus = Arc::new(RecordingBus::default());
        let declaration = DerivedTopicDeclaration::new(
            "derived/door",
            SourceSpec::Single("door".into()),
            "maptopic",
        )
        .with_option("transform", json!("string-boolean"));
        let mut topic = DerivedTopic::new(declaration, bus.clone(), no_lookup);

        topic.on_source_update("door", &TopicValue::from("true"));
        assert_eq!(topic.value(), Some(&TopicValue::Number(1.0)));

        // Unmappable payload: nothing published, previous value kept
        topic.on_source_update("door", &TopicValue::from("jammed"));
        assert_eq!(topic.value(), Some(&TopicValue::Number(1.0)));
        assert_eq!(bus.published.lock().len(), 1);
    }

    #[test]
    fn test_unknown_calculator() {
        let bus = Arc::new(RecordingBus::default());
        let declaration =
            DerivedTopicDeclaration::new("derived/x", SourceSpec::Single("A".into()), "heatindex");
        let mut topic = DerivedTopic::new(declaration, bus.clone(), no_lookup);

        assert!(!topic.has_calculator());
        assert_eq!(topic.on_source_update("A", &TopicValue::Number(1.0)), None);
        assert!(bus.published.lock().is_empty());
        assert_eq!(topic.declaration().calculator.as_deref(), Some("heatindex"));
    }

    #[test]
    fn test_redeclare_same_calculator_keeps_values() {
        let bus = Arc::new(RecordingBus::default());
        let mut topic = DerivedTopic::new(average_ab(), bus, no_lookup);
        topic.on_source_update("A", &TopicValue::Number(2.0));

        let mut redeclared = average_ab();
        redeclared.source = SourceSpec::List(vec!["A".into(), "B".into(), "C".into()]);
        topic.redeclare(redeclared, no_lookup);

        assert_eq!(topic.binding().value("A"), Some(&TopicValue::Number(2.0)));
        assert_eq!(topic.binding().watched_topics().len(), 3);
    }

    #[test]
    fn test_redeclare_other_calculator_discards_values() {
        let bus = Arc::new(RecordingBus::default());
        let mut topic = DerivedTopic::new(average_ab(), bus, no_lookup);
        topic.on_source_update("A", &TopicValue::Number(2.0));

        let mut redeclared = average_ab();
        redeclared.calculator = Some("averagepresent".into());
        topic.redeclare(redeclared, |name| {
            (name == "B").then(|| TopicValue::Number(8.0))
        });

        assert_eq!(topic.calculator_name(), Some("averagepresent"));
        assert_eq!(topic.binding().value("A"), None);
        assert_eq!(topic.binding().value("B"), Some(&TopicValue::Number(8.0)));
    }

    #[test]
    fn test_redeclare_other_calculator_clears_value() {
        // Test: A value computed by the old calculator is not kept after a switch
        let bus = Arc::new(RecordingBus::default());
        let mut topic = DerivedTopic::new(average_ab(), bus.clone(), no_lookup);
        topic.on_source_update("A", &TopicValue::Number(2.0));
        topic.on_source_update("B", &TopicValue::Number(4.0));
        assert_eq!(topic.value(), Some(&TopicValue::Number(3.0)));

        let mut redeclared = average_ab();
        redeclared.calculator = Some("averagepresent".into());
        topic.redeclare(redeclared, no_lookup);

        assert_eq!(topic.value(), None);
        assert_eq!(bus.published.lock().len(), 1);
    }

    #[test]
    fn test_custom_precision() {
        let bus = Arc::new(RecordingBus::default());
        let declaration = DerivedTopicDeclaration {
            precision: Some(2),
            ..DerivedTopicDeclaration::new(
                "derived/float",
                SourceSpec::Single("A".into()),
                "maptopic",
            )
            .with_option("transform", json!("string-float"))
        };
        let mut topic = DerivedTopic::new(declaration, bus.clone(), no_lookup);

        assert_eq!(
            topic.on_source_update("A", &TopicValue::Number(21.567)),
            Some(TopicValue::Number(22.0))
        );
        assert_eq!(bus.published.lock()[0].1, "22");
        assert_eq!(topic.declaration().precision, Some(2));
    }
}
