//! Shared decoding helpers for exchange payloads.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::ports::CodecError;

/// Parse a JSON number or numeric string.
pub fn number(value: &Value) -> Result<f64, CodecError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| CodecError::number(n.to_string(), "not representable as f64")),
        Value::String(s) => s.parse().map_err(|e| CodecError::number(s.as_str(), e)),
        other => Err(CodecError::number(other.to_string(), "not a number")),
    }
}

/// Parse a JSON integer or integer string.
pub fn integer(value: &Value) -> Result<i64, CodecError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| CodecError::number(n.to_string(), "not an integer")),
        Value::String(s) => s.parse().map_err(|e| CodecError::number(s.as_str(), e)),
        other => Err(CodecError::number(other.to_string(), "not an integer")),
    }
}

/// Unix milliseconds to a timestamp, clamped so it is never in the future.
pub fn millis_clamped(millis: i64) -> Result<DateTime<Utc>, CodecError> {
    let time = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| CodecError::timestamp(millis.to_string(), "out of range"))?;
    Ok(time.min(Utc::now()))
}

/// Decimal unix seconds such as `"1542057314.748512345"`.
pub fn unix_decimal(input: &str) -> Result<DateTime<Utc>, CodecError> {
    let seconds: f64 = input
        .parse()
        .map_err(|e| CodecError::timestamp(input, e))?;
    let whole = seconds.trunc();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let nanos = ((seconds - whole) * 1e9) as u32;
    #[allow(clippy::cast_possible_truncation)]
    DateTime::from_timestamp(whole as i64, nanos)
        .ok_or_else(|| CodecError::timestamp(input, "out of range"))
}

/// RFC 3339 timestamp.
pub fn rfc3339(input: &str) -> Result<DateTime<Utc>, CodecError> {
    DateTime::parse_from_rfc3339(input)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CodecError::timestamp(input, e))
}
