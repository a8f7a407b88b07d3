//! InfluxDB v2 store
//!
//! ## API Reference
//!
//! Write: `POST {url}/api/v2/write?org={org}&bucket={bucket}&precision=ns`
//! with a line protocol body, one measurement per topic and a single field
//! `value` (float for numbers, string otherwise).
//!
//! Query: `POST {url}/api/v2/query?org={org}` with a Flux script; the
//! response is CSV with a header row per result table.

use super::{Store, StoreError, StorePoint};
use crate::topics::types::TopicValue;
use async_trait::async_trait;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 10;

pub struct InfluxStore {
    client: reqwest::Client,
    url: String,
    token: String,
    org: String,
    bucket: String,
}

impl InfluxStore {
    pub fn new(url: &str, token: &str, org: &str, bucket: &str) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            org: org.to_string(),
            bucket: bucket.to_string(),
        })
    }

    fn flux_query(&self, topic: &str, lookback: Duration) -> String {
        format!(
            "from(bucket:\"{}\")\n  |> range(start: -{}s)\n  |> filter(fn: (r) => r._measurement == \"{}\")\n  |> sort(columns: [\"_time\"])",
            escape_flux_string(&self.bucket),
            lookback.as_secs().max(1),
            escape_flux_string(topic)
        )
    }
}

fn escape_flux_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn escape_measurement(measurement: &str) -> String {
    let mut escaped = String::with_capacity(measurement.len());
    for c in measurement.chars() {
        if matches!(c, ',' | ' ' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Line protocol for one point
pub fn line_protocol(measurement: &str, value: &TopicValue, timestamp_nanos: i64) -> String {
    let field = match value {
        TopicValue::Number(n) => format!("value={}", n),
        TopicValue::Text(s) => format!("value=\"{}\"", escape_flux_string(s)),
    };
    format!("{} {} {}", escape_measurement(measurement), field, timestamp_nanos)
}

/// Split one CSV row, honouring double-quoted cells
fn split_csv_row(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => cells.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    cells.push(current);
    cells
}

/// Parse a Flux CSV response into points sorted oldest first
///
/// Tables are separated by blank lines and each starts with its own header.
/// Annotation rows (`#datatype`, …) are skipped.
pub fn parse_flux_csv(body: &str) -> Result<Vec<StorePoint>, StoreError> {
    let mut points = Vec::new();
    let mut columns: Option<(usize, usize, usize)> = None;

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            columns = None;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let cells = split_csv_row(line);

        let Some((time_idx, value_idx, measurement_idx)) = columns else {
            let find = |name: &str| cells.iter().position(|cell| cell == name);
            match (find("_time"), find("_value"), find("_measurement")) {
                (Some(t), Some(v), Some(m)) => columns = Some((t, v, m)),
                _ => {
                    return Err(StoreError::Parse(format!(
                        "Unexpected Flux CSV header: {}",
                        line
                    )))
                }
            }
            continue;
        };

        let cell = |idx: usize| cells.get(idx).map(String::as_str).unwrap_or("");

        let time = chrono::DateTime::parse_from_rfc3339(cell(time_idx))
            .map_err(|e| StoreError::Parse(format!("Bad _time '{}': {}", cell(time_idx), e)))?
            .timestamp_millis();

        points.push(StorePoint {
            topic: cell(measurement_idx).to_string(),
            time,
            value: TopicValue::parse(cell(value_idx)),
        });
    }

    points.sort_by_key(|point| point.time);
    Ok(points)
}

#[async_trait]
impl Store for InfluxStore {
    async fn write_point(
        &self,
        measurement: &str,
        value: &TopicValue,
        timestamp_nanos: i64,
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .post(format!("{}/api/v2/write", self.url))
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(line_protocol(measurement, value, timestamp_nanos))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Http(format!(
                "Write returned status {}",
                response.status()
            )));
        }

        log::debug!("📊 Archived {} = {}", measurement, value);
        Ok(())
    }

    async fn query_range(
        &self,
        topic: &str,
        lookback: Duration,
    ) -> Result<Vec<StorePoint>, StoreError> {
        let response = self
            .client
            .post(format!("{}/api/v2/query", self.url))
            .query(&[("org", self.org.as_str())])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "application/vnd.flux")
            .header("Accept", "application/csv")
            .body(self.flux_query(topic, lookback))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Http(format!(
                "Query returned status {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        parse_flux_csv(&body)
    }

    fn backend_type(&self) -> &'static str {
        "InfluxDB"
    }
}
