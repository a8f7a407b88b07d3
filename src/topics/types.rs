//! Core value types shared by raw and derived topics

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A single reading carried by a topic
///
/// Payloads that parse as a finite number become `Number`, everything else is
/// kept verbatim as `Text`. Parsing never fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopicValue {
    Number(f64),
    Text(String),
}

impl TopicValue {
    /// Parse a raw bus payload
    ///
    /// `"0"` stays the number zero; `"NaN"`, `"inf"` and other non-finite
    /// spellings are kept as text.
    pub fn parse(payload: &str) -> Self {
        match payload.trim().parse::<f64>() {
            Ok(number) if number.is_finite() => TopicValue::Number(number),
            _ => TopicValue::Text(payload.to_string()),
        }
    }

    /// Numeric view of the value, parsing text when possible
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TopicValue::Number(n) => Some(*n),
            TopicValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }

    /// Text view of the value (numbers are not converted)
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TopicValue::Text(s) => Some(s.as_str()),
            TopicValue::Number(_) => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, TopicValue::Number(_))
    }
}

impl fmt::Display for TopicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicValue::Number(n) => write!(f, "{}", n),
            TopicValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for TopicValue {
    fn from(value: f64) -> Self {
        TopicValue::Number(value)
    }
}

impl From<&str> for TopicValue {
    fn from(value: &str) -> Self {
        TopicValue::Text(value.to_string())
    }
}

/// One history entry of a raw topic (timestamp in Unix milliseconds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub value: TopicValue,
    pub timestamp: i64,
}

/// Round a number to `digits` significant digits
///
/// Goes through scientific notation so the result is the closest `f64` to
/// the rounded decimal (`46.99999` → `47`, `0.012345` → `0.01235`).
pub fn round_significant(value: f64, digits: u32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let digits = digits.max(1) as usize;
    format!("{:.*e}", digits - 1, value)
        .parse::<f64>()
        .unwrap_or(value)
}

/// Stable hex id for a topic name
pub fn topic_hash(topic: &str) -> String {
    let digest = Sha256::digest(topic.as_bytes());
    hex::encode(&digest[..16])
}

/// Current Unix timestamp in milliseconds
pub fn current_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
