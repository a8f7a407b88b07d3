//! Perceived heat stress from dry and wet bulb temperatures
//!
//! `value = temperature + (max - wetbulb)` where `max` is the wet bulb
//! temperature considered survivable (option `max`, default 42 °C).

use super::{option_f64, required_numbers, Calculator, CalculatorInput, CalculatorOptions};
use crate::topics::types::TopicValue;

pub const DEFAULT_MAX_WET_BULB: f64 = 42.0;

pub struct WetBulbHuman {
    max: f64,
}

impl WetBulbHuman {
    pub fn new(options: &CalculatorOptions) -> Self {
        Self {
            max: option_f64(options, "max").unwrap_or(DEFAULT_MAX_WET_BULB),
        }
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

impl Calculator for WetBulbHuman {
    fn name(&self) -> &'static str {
        "wetbulbhuman"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["temperature", "wetbulb"]
    }

    fn calculate(&self, input: &CalculatorInput<'_>) -> Option<TopicValue> {
        let [temperature, wet_bulb] =
            required_numbers(input, self.name(), ["temperature", "wetbulb"])?;
        Some(TopicValue::Number(temperature + (self.max - wet_bulb)))
    }

    fn reconfigure(&mut self, options: &CalculatorOptions) {
        self.max = option_f64(options, "max").unwrap_or(DEFAULT_MAX_WET_BULB);
    }
}
