//! Psychrometric calculators
//!
//! Each calculator only converts units and gates on required fields; the
//! formulas live in [`crate::psychrometrics`]. Source conventions:
//! humidity in %, temperature in °C, pressure in hPa (×100 → Pa).

use super::{required_numbers, Calculator, CalculatorInput};
use crate::psychrometrics::{self, PsychroResult, STANDARD_PRESSURE_PA};
use crate::topics::types::TopicValue;

fn to_pascal(pressure: f64) -> f64 {
    pressure * 100.0
}

fn to_ratio(percent: f64) -> f64 {
    percent / 100.0
}

fn finish(calculator: &str, topic: &str, result: PsychroResult) -> Option<TopicValue> {
    match result {
        Ok(value) => Some(TopicValue::Number(value)),
        Err(e) => {
            log::debug!("{} for {}: {}", calculator, topic, e);
            None
        }
    }
}

pub struct DewPoint;

impl Calculator for DewPoint {
    fn name(&self) -> &'static str {
        "dewpoint"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["humidity", "temperature"]
    }

    fn calculate(&self, input: &CalculatorInput<'_>) -> Option<TopicValue> {
        let [humidity, temperature] =
            required_numbers(input, self.name(), ["humidity", "temperature"])?;
        finish(
            self.name(),
            input.topic,
            psychrometrics::t_dew_point_from_rel_hum(temperature, to_ratio(humidity)),
        )
    }
}

/// Wet bulb temperature; standard pressure unless a `pressure` field is bound
pub struct WetBulb;

impl Calculator for WetBulb {
    fn name(&self) -> &'static str {
        "wetbulb"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["humidity", "temperature"]
    }

    fn calculate(&self, input: &CalculatorInput<'_>) -> Option<TopicValue> {
        let [humidity, temperature] =
            required_numbers(input, self.name(), ["humidity", "temperature"])?;
        let pressure = input
            .number("pressure")
            .map(to_pascal)
            .unwrap_or(STANDARD_PRESSURE_PA);
        finish(
            self.name(),
            input.topic,
            psychrometrics::t_wet_bulb_from_rel_hum(temperature, to_ratio(humidity), pressure),
        )
    }
}

/// Humidity ratio ×100, published as g/m³
pub struct AbsoluteHumidity;

impl Calculator for AbsoluteHumidity {
    fn name(&self) -> &'static str {
        "absolutehumidity"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["humidity", "temperature", "pressure"]
    }

    fn calculate(&self, input: &CalculatorInput<'_>) -> Option<TopicValue> {
        let [humidity, temperature, pressure] =
            required_numbers(input, self.name(), ["humidity", "temperature", "pressure"])?;
        let result = psychrometrics::hum_ratio_from_rel_hum(
            temperature,
            to_ratio(humidity),
            to_pascal(pressure),
        )
        .map(|hum_ratio| hum_ratio * 100.0);
        finish(self.name(), input.topic, result)
    }
}

/// Specific volume of moist air. `humidity` is already a humidity ratio
/// (typically an `absolutehumidity` topic) and is passed through unchanged.
pub struct MoistAirVolume;

impl Calculator for MoistAirVolume {
    fn name(&self) -> &'static str {
        "moistairvolume"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["temperature", "humidity", "pressure"]
    }

    fn calculate(&self, input: &CalculatorInput<'_>) -> Option<TopicValue> {
        let [temperature, humidity, pressure] =
            required_numbers(input, self.name(), ["temperature", "humidity", "pressure"])?;
        finish(
            self.name(),
            input.topic,
            psychrometrics::moist_air_volume(temperature, humidity, to_pascal(pressure)),
        )
    }
}

pub struct MoistAirDensity;

impl Calculator for MoistAirDensity {
    fn name(&self) -> &'static str {
        "moistairdensity"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["humidity"]
    }

    fn calculate(&self, input: &CalculatorInput<'_>) -> Option<TopicValue> {
        let [humidity] = required_numbers(input, self.name(), ["humidity"])?;
        Some(TopicValue::Number(humidity * 1000.0))
    }
}
