use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const MICRO_DIGITS: usize = 16;

/// A timestamp as it comes back from the analytics backend: either whole
/// microseconds since the Unix epoch or a textual timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimestampValue {
    Micros(i64),
    Text(String),
}

impl fmt::Display for TimestampValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Micros(v) => write!(f, "{}", v),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for TimestampValue {
    fn from(value: i64) -> Self {
        Self::Micros(value)
    }
}

impl From<&str> for TimestampValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for TimestampValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Reports whether a value looks like microseconds since the Unix epoch.
///
/// The check is a heuristic: the value must be numeric and its decimal
/// representation exactly 16 characters long. Any other 16-character numeral
/// is misclassified, and microsecond values outside 2001-09-09..2286-11-20
/// are not recognized. Callers rely on this exact boundary.
pub fn is_micro_encoded(value: impl fmt::Display) -> bool {
    let value = value.to_string();
    value.len() == MICRO_DIGITS && value.parse::<f64>().is_ok_and(|v| !v.is_nan())
}

/// Renders a microsecond timestamp as ISO-8601, or `None` if the value is not
/// numeric or out of range.
pub fn micro_to_iso(value: impl fmt::Display) -> Option<String> {
    let value = value.to_string();
    let micros = match value.parse::<i64>() {
        Ok(v) => v,
        Err(_) => value.parse::<f64>().ok().filter(|v| v.is_finite())? as i64,
    };
    micro_to_datetime(micros).map(to_iso)
}

/// Millisecond precision, matching what a browser's `Date::toISOString`
/// produces.
pub fn micro_to_datetime(micros: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(micros.div_euclid(1000)).single()
}

#[inline]
pub fn to_iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses RFC 3339 timestamps, naive `YYYY-MM-DD[T ]HH:MM:SS[.f]` timestamps
/// (taken as UTC) and micro-encoded numerals.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if is_micro_encoded(value) {
        return value.parse::<i64>().ok().and_then(micro_to_datetime);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Resolves a backend timestamp to an instant. Integers that are not
/// micro-encoded are taken as milliseconds since the epoch.
pub fn normalize(value: &TimestampValue) -> Option<DateTime<Utc>> {
    match value {
        TimestampValue::Micros(v) if is_micro_encoded(v) => micro_to_datetime(*v),
        TimestampValue::Micros(v) => Utc.timestamp_millis_opt(*v).single(),
        TimestampValue::Text(s) => parse_timestamp(s),
    }
}
