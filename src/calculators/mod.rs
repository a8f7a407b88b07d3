//! Calculator framework for derived topics
//!
//! A calculator turns the current values of a derived topic's source binding
//! into one output value. Calculators never publish themselves: they return
//! `Some(value)` when every input they need is present and `None` otherwise,
//! and the owning `DerivedTopic` applies precision rounding and publishes.
//!
//! ## Catalog
//!
//! | name | inputs |
//! |---|---|
//! | `average` | list (strict) or fields (lenient) |
//! | `averagepresent` | any shape, lenient |
//! | `dewpoint` | humidity, temperature |
//! | `wetbulb` | humidity, temperature, optional pressure |
//! | `wetbulbhuman` | temperature, wetbulb; option `max` |
//! | `absolutehumidity` | humidity, temperature, pressure |
//! | `maptopic` | single source; option `transform` |
//! | `moistairvolume` | temperature, humidity, pressure |
//! | `moistairdensity` | humidity |

pub mod average;
pub mod map_topic;
pub mod psychro;
pub mod wet_bulb_human;

use crate::topics::source::SourceBinding;
use crate::topics::types::TopicValue;
use serde_json::{Map, Value};

pub use average::{Average, AveragePresent};
pub use map_topic::MapTopic;
pub use psychro::{AbsoluteHumidity, DewPoint, MoistAirDensity, MoistAirVolume, WetBulb};
pub use wet_bulb_human::WetBulbHuman;

/// Declaration fields passed to calculators (`transform`, `max`, …)
pub type CalculatorOptions = Map<String, Value>;

/// Everything a calculator may read during one calculation
pub struct CalculatorInput<'a> {
    /// Output topic name (for logging)
    pub topic: &'a str,
    pub binding: &'a SourceBinding,
    pub options: &'a CalculatorOptions,
}

impl<'a> CalculatorInput<'a> {
    pub fn new(topic: &'a str, binding: &'a SourceBinding, options: &'a CalculatorOptions) -> Self {
        Self {
            topic,
            binding,
            options,
        }
    }

    /// Numeric value of a named field; text that does not parse counts as
    /// missing
    pub fn number(&self, field: &str) -> Option<f64> {
        self.binding.field_value(field).and_then(TopicValue::as_f64)
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }
}

/// Read a numeric option, accepting numbers and numeric strings
pub fn option_f64(options: &CalculatorOptions, key: &str) -> Option<f64> {
    match options.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A pluggable transform producing a derived topic's value
pub trait Calculator: Send {
    /// Catalog key
    fn name(&self) -> &'static str;

    /// Field names read from a `fields` binding
    fn required_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Compute the output, or `None` while inputs are insufficient
    fn calculate(&self, input: &CalculatorInput<'_>) -> Option<TopicValue>;

    /// Apply new declaration options when a topic is redeclared with the same
    /// calculator
    fn reconfigure(&mut self, _options: &CalculatorOptions) {}
}

/// Fixed catalog of built-in calculators
pub struct CalculatorCatalog;

impl CalculatorCatalog {
    pub const NAMES: &'static [&'static str] = &[
        "average",
        "averagepresent",
        "dewpoint",
        "wetbulb",
        "wetbulbhuman",
        "absolutehumidity",
        "maptopic",
        "moistairvolume",
        "moistairdensity",
    ];

    /// Instantiate a calculator by name; `None` for unknown names
    pub fn create(name: &str, options: &CalculatorOptions) -> Option<Box<dyn Calculator>> {
        let calculator: Box<dyn Calculator> = match name {
            "average" => Box::new(Average),
            "averagepresent" => Box::new(AveragePresent),
            "dewpoint" => Box::new(DewPoint),
            "wetbulb" => Box::new(WetBulb),
            "wetbulbhuman" => Box::new(WetBulbHuman::new(options)),
            "absolutehumidity" => Box::new(AbsoluteHumidity),
            "maptopic" => Box::new(MapTopic),
            "moistairvolume" => Box::new(MoistAirVolume),
            "moistairdensity" => Box::new(MoistAirDensity),
            _ => return None,
        };
        Some(calculator)
    }

    pub fn contains(name: &str) -> bool {
        Self::NAMES.contains(&name)
    }
}

/// Collect required numeric fields, logging the first missing one
pub(crate) fn required_numbers<const N: usize>(
    input: &CalculatorInput<'_>,
    calculator: &str,
    fields: [&str; N],
) -> Option<[f64; N]> {
    let mut values = [0.0; N];
    for (slot, field) in values.iter_mut().zip(fields) {
        match input.number(field) {
            Some(value) => *slot = value,
            None => {
                log::debug!(
                    "{} for {}: missing source field '{}'",
                    calculator,
                    input.topic,
                    field
                );
                return None;
            }
        }
    }
    Some(values)
}
