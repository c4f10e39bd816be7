//! Lenient timestamp parsing for topology documents.
//!
//! Documents written by this crate carry RFC 3339 timestamps. Older
//! documents carry naive ISO 8601 local times without an offset; those are
//! read as UTC.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, de};

const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Parses an RFC 3339 timestamp, falling back to a naive ISO 8601 one.
pub(super) fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let trimmed = raw.trim();
    DateTime::parse_from_rfc3339(trimmed)
        .map(|stamp| stamp.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(trimmed, NAIVE_FORMAT).map(|naive| naive.and_utc())
        })
}

pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse(&raw).map_err(|err| de::Error::custom(format!("invalid timestamp {raw:?}: {err}")))
}

pub(super) fn deserialize_option<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|raw| {
            parse(&raw)
                .map_err(|err| de::Error::custom(format!("invalid timestamp {raw:?}: {err}")))
        })
        .transpose()
}
