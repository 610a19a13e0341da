//! Server timestamps of fetched records.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use medsync_domain::time::{self, Timestamp, Version};

const RECORD_KEYS: [&str; 2] = ["lastUpdated", "updatedAt"];

/// The merge version of a fetched record.
///
/// Prefers the record's own timestamp, then the response `Date` header,
/// then the local clock.
pub(crate) fn record_version(record: &Map<String, Value>, date_header: Option<&str>) -> Version {
    let nested = record
        .get("realTimeData")
        .and_then(Value::as_object)
        .and_then(|rt| rt.get("lastUpdated"));
    let from_record = RECORD_KEYS
        .iter()
        .filter_map(|key| record.get(*key))
        .chain(nested)
        .find_map(parse_value);
    if let Some(version) = from_record {
        return version;
    }
    date_header
        .and_then(parse_http_date)
        .map_or_else(|| Version::from_timestamp(time::now()), Version::from_timestamp)
}

fn parse_value(value: &Value) -> Option<Version> {
    match value {
        Value::Number(n) => n.as_i64().map(Version::from_millis),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|ts| Version::from_timestamp(ts.with_timezone(&Utc))),
        _ => None,
    }
}

/// Parse an HTTP `Date` header (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub(crate) fn parse_http_date(raw: &str) -> Option<Timestamp> {
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
