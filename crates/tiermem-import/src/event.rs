//! Source-line parsing. All shape sniffing of session logs happens here;
//! everything downstream sees a [`SourceEvent`].

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

/// One classified line of a JSONL source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Usage(UsageEvent),
    /// Valid JSON without a usage block.
    NoUsage,
    /// `[DONE]` stream terminators.
    Sentinel,
    /// `#` or `//` comment lines.
    Comment,
}

/// Raw usage figures as found in the source, before canonicalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageEvent {
    pub provider: Option<String>,
    pub model: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub embedded_cost: Option<f64>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawUsage {
    #[serde(alias = "input_tokens")]
    input: Option<u64>,
    #[serde(alias = "output_tokens")]
    output: Option<u64>,
    #[serde(rename = "cacheRead", alias = "cache_read_input_tokens")]
    cache_read: Option<u64>,
    #[serde(
        rename = "cacheWrite",
        alias = "cache_creation_input_tokens",
        alias = "cache_write_input_tokens"
    )]
    cache_write: Option<u64>,
    cost: Option<RawCost>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCost {
    Amount(f64),
    Breakdown { total: f64 },
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// RFC 3339, a zone-less ISO timestamp taken as UTC, or epoch seconds/millis.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            }),
        Value::Number(n) => {
            let raw = n.as_f64()?;
            if raw > 1e12 {
                Utc.timestamp_millis_opt(raw as i64).single()
            } else {
                Utc.timestamp_opt(raw as i64, 0).single()
            }
        }
        _ => None,
    }
}

/// Classify one non-empty source line.
///
/// SSE `data:` prefixes are stripped first. Returns the JSON error for lines
/// that are neither JSON, a sentinel, nor a comment.
pub fn parse_line(line: &str) -> Result<SourceEvent, serde_json::Error> {
    let mut line = line.trim();
    if let Some(rest) = line.strip_prefix("data:") {
        line = rest.trim_start();
    }
    if line == "[DONE]" {
        return Ok(SourceEvent::Sentinel);
    }
    if line.starts_with('#') || line.starts_with("//") {
        return Ok(SourceEvent::Comment);
    }

    let data: Value = serde_json::from_str(line)?;
    let message = data.get("message").filter(|m| m.is_object());

    let usage_value = message
        .and_then(|m| m.get("usage"))
        .filter(|u| u.is_object())
        .or_else(|| data.get("usage").filter(|u| u.is_object()));
    let Some(usage_value) = usage_value else {
        return Ok(SourceEvent::NoUsage);
    };
    let usage: RawUsage = match serde_json::from_value(usage_value.clone()) {
        Ok(u) => u,
        Err(_) => return Ok(SourceEvent::NoUsage),
    };

    let field = |name: &str| message.and_then(|m| m.get(name)).or_else(|| data.get(name));
    let timestamp = data
        .get("timestamp")
        .or_else(|| message.and_then(|m| m.get("timestamp")))
        .and_then(parse_timestamp);

    Ok(SourceEvent::Usage(UsageEvent {
        provider: non_empty_str(field("provider")),
        model: non_empty_str(field("model")).unwrap_or_else(|| "unknown".into()),
        timestamp,
        input_tokens: usage.input.unwrap_or(0),
        output_tokens: usage.output.unwrap_or(0),
        cache_read_tokens: usage.cache_read.unwrap_or(0),
        cache_write_tokens: usage.cache_write.unwrap_or(0),
        embedded_cost: usage.cost.map(|c| match c {
            RawCost::Amount(v) => v,
            RawCost::Breakdown { total } => total,
        }),
    }))
}
