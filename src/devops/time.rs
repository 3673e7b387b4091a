//! Lenient timestamp handling for API payloads.
//!
//! Azure DevOps reports unset instants as `0001-01-01T00:00:00` and sometimes
//! omits the offset. Anything that is absent, unparseable or not after the
//! unix epoch deserializes to `None`, so it can never be exported as a real
//! data point.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Parse an API timestamp, returning `None` for zero or invalid values.
#[must_use]
pub fn parse(value: &str) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").map(|t| t.and_utc())
        })
        .ok()?;

    (parsed.timestamp() > 0).then_some(parsed)
}

/// `deserialize_with` helper for optional timestamps.
///
/// # Errors
///
/// Only fails if the value is neither a string nor null.
pub fn lenient<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse))
}

/// RFC 3339 formatting used in query strings.
#[must_use]
pub fn format(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
