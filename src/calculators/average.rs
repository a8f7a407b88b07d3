//! Average calculators
//!
//! Two catalog entries exist because deployed declarations rely on both
//! behaviours:
//!
//! - `average`: over a `list` source every listed topic must have a numeric
//!   value, otherwise nothing is produced. Over `fields` or `single` sources
//!   it averages whatever is present.
//! - `averagepresent`: always averages whatever is present.

use super::{Calculator, CalculatorInput};
use crate::topics::source::BindingKind;
use crate::topics::types::TopicValue;

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn present_values(input: &CalculatorInput<'_>) -> Vec<f64> {
    input
        .binding
        .watched_topics()
        .iter()
        .filter_map(|topic| input.binding.value(topic).and_then(TopicValue::as_f64))
        .collect()
}

pub struct Average;

impl Calculator for Average {
    fn name(&self) -> &'static str {
        "average"
    }

    fn calculate(&self, input: &CalculatorInput<'_>) -> Option<TopicValue> {
        let values = present_values(input);

        if input.binding.kind() == BindingKind::List {
            let expected = input.binding.watched_topics().len();
            if values.len() != expected {
                log::debug!(
                    "average for {}: missing {} source(s)",
                    input.topic,
                    expected - values.len()
                );
                return None;
            }
        }

        mean(&values).map(TopicValue::Number)
    }
}

pub struct AveragePresent;

impl Calculator for AveragePresent {
    fn name(&self) -> &'static str {
        "averagepresent"
    }

    fn calculate(&self, input: &CalculatorInput<'_>) -> Option<TopicValue> {
        mean(&present_values(input)).map(TopicValue::Number)
    }
}
