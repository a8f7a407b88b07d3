//! Map a single source topic to a number
//!
//! Over a `single` (or `list`, first entry) source the `transform` option
//! selects the mapping:
//!
//! - `string-boolean`: `"true"` → 1, `"false"` → 0, anything else → nothing
//! - `string-float`: numeric parse of the payload
//!
//! Over a `fields` source the legacy contact mapping applies: the first
//! field's payload `"true"` → 1, anything else → 0.

use super::{Calculator, CalculatorInput};
use crate::topics::source::SourceSpec;
use crate::topics::types::TopicValue;

pub struct MapTopic;

impl MapTopic {
    fn string_boolean(value: &TopicValue) -> Option<f64> {
        match value.as_text()?.trim() {
            "true" => Some(1.0),
            "false" => Some(0.0),
            _ => None,
        }
    }

    fn string_float(value: &TopicValue) -> Option<f64> {
        value.as_f64()
    }
}

impl Calculator for MapTopic {
    fn name(&self) -> &'static str {
        "maptopic"
    }

    fn calculate(&self, input: &CalculatorInput<'_>) -> Option<TopicValue> {
        let source_topic = match input.binding.spec() {
            SourceSpec::Fields(fields) => {
                let topic = fields.values().next()?;
                let contact = input.binding.value(topic)?;
                let closed = matches!(contact.as_text().map(str::trim), Some("true"));
                return Some(TopicValue::Number(if closed { 1.0 } else { 0.0 }));
            }
            SourceSpec::Single(topic) => topic,
            SourceSpec::List(topics) => topics.first()?,
        };

        let value = input.binding.value(source_topic)?;
        if matches!(value, TopicValue::Text(text) if text.is_empty()) {
            return None;
        }

        let mapped = match input.option_str("transform") {
            Some("string-boolean") => Self::string_boolean(value),
            Some("string-float") => Self::string_float(value),
            Some(other) => {
                log::debug!("maptopic for {}: unknown transform '{}'", input.topic, other);
                None
            }
            None => {
                log::debug!("maptopic for {}: no transform configured", input.topic);
                None
            }
        };
        mapped.map(TopicValue::Number)
    }
}
