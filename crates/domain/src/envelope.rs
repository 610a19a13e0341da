//! Envelope — one push message addressed to one hospital.
//!
//! Wire shape:
//!
//! ```text
//! { "topic": "hospital:bed-status", "hospitalId": "H1",
//!   "payload": { "availableBeds": 9 }, "timestamp": 1700000000000 }
//! ```
//!
//! `timestamp` is the ordering token, in the same clock as fetched records:
//! epoch milliseconds or an RFC 3339 string. A bare `sequence` counter is
//! not comparable with fetch versions, so a frame without `timestamp` is
//! rejected.

use chrono::DateTime;
use serde_json::{Map, Value};

use crate::id::HospitalId;
use crate::time::Version;
use crate::topic::{Topic, UnknownTopic};

/// A decoded push message. Consumed once, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEnvelope {
    pub topic: Topic,
    pub hospital_id: HospitalId,
    pub payload: Map<String, Value>,
    pub version: Version,
}

/// Why a frame could not be decoded into an [`UpdateEnvelope`].
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("frame is not valid JSON")]
    Json(#[source] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{0}` has an invalid value")]
    InvalidField(&'static str),

    #[error("unsupported topic")]
    UnknownTopic(#[source] UnknownTopic),
}

impl UpdateEnvelope {
    #[must_use]
    pub fn new(
        topic: Topic,
        hospital_id: HospitalId,
        payload: Map<String, Value>,
        version: Version,
    ) -> Self {
        Self {
            topic,
            hospital_id,
            payload,
            version,
        }
    }

    /// Decode a raw text frame.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] when the frame is not JSON, a required field
    /// is missing or mistyped, or the topic is unknown.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_str(text).map_err(EnvelopeError::Json)?;
        Self::from_value(value)
    }

    /// Decode an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// See [`UpdateEnvelope::parse`].
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let Value::Object(mut frame) = value else {
            return Err(EnvelopeError::NotAnObject);
        };

        let topic = match frame.get("topic") {
            Some(Value::String(name)) => name.parse().map_err(EnvelopeError::UnknownTopic)?,
            Some(_) => return Err(EnvelopeError::InvalidField("topic")),
            None => return Err(EnvelopeError::MissingField("topic")),
        };

        let hospital_id = match frame.get("hospitalId") {
            Some(Value::String(raw)) => {
                HospitalId::new(raw.as_str()).map_err(|_| EnvelopeError::InvalidField("hospitalId"))?
            }
            Some(_) => return Err(EnvelopeError::InvalidField("hospitalId")),
            None => return Err(EnvelopeError::MissingField("hospitalId")),
        };

        let version = match frame.get("timestamp") {
            Some(raw) => parse_version(raw).ok_or(EnvelopeError::InvalidField("timestamp"))?,
            None => return Err(EnvelopeError::MissingField("timestamp")),
        };

        let payload = match frame.remove("payload") {
            Some(Value::Object(payload)) => payload,
            Some(_) => return Err(EnvelopeError::InvalidField("payload")),
            None => return Err(EnvelopeError::MissingField("payload")),
        };

        Ok(Self {
            topic,
            hospital_id,
            payload,
            version,
        })
    }

    /// Encode back to the wire shape.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "topic": self.topic,
            "hospitalId": self.hospital_id,
            "payload": self.payload,
            "timestamp": self.version,
        })
    }
}

fn parse_version(raw: &Value) -> Option<Version> {
    match raw {
        Value::Number(number) => {
            if let Some(millis) = number.as_i64() {
                return Some(Version::from_millis(millis));
            }
            let float = number.as_f64()?;
            // Whole milliseconds only; `as` saturates, the range check rejects overflow.
            #[allow(clippy::cast_possible_truncation)]
            let millis = float.trunc() as i64;
            (float.is_finite() && float.abs() < 9.0e18).then_some(Version::from_millis(millis))
        }
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|ts| Version::from_millis(ts.timestamp_millis())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_bed_status_frame() {
        let envelope = UpdateEnvelope::parse(
            r#"{"topic":"hospital:bed-status","hospitalId":"H1","payload":{"availableBeds":9},"timestamp":100}"#,
        )
        .unwrap();

        assert_eq!(envelope.topic, Topic::BedStatus);
        assert_eq!(envelope.hospital_id.as_str(), "H1");
        assert_eq!(envelope.payload["availableBeds"], 9);
        assert_eq!(envelope.version, Version::from_millis(100));
    }

    #[test]
    fn should_reject_sequence_counter_without_timestamp() {
        let result = UpdateEnvelope::parse(
            r#"{"topic":"hospital:update","hospitalId":"H1","payload":{},"sequence":7}"#,
        );
        assert!(matches!(
            result,
            Err(EnvelopeError::MissingField("timestamp"))
        ));
    }

    #[test]
    fn should_accept_rfc3339_timestamp() {
        let envelope = UpdateEnvelope::parse(
            r#"{"topic":"hospital:update","hospitalId":"H1","payload":{},"timestamp":"1970-01-01T00:00:01Z"}"#,
        )
        .unwrap();
        assert_eq!(envelope.version, Version::from_millis(1000));
    }

    #[test]
    fn should_reject_invalid_json() {
        let result = UpdateEnvelope::parse("{not json");
        assert!(matches!(result, Err(EnvelopeError::Json(_))));
    }

    #[test]
    fn should_reject_non_object_frame() {
        let result = UpdateEnvelope::parse("[1,2,3]");
        assert!(matches!(result, Err(EnvelopeError::NotAnObject)));
    }

    #[test]
    fn should_reject_unknown_topic() {
        let result = UpdateEnvelope::parse(
            r#"{"topic":"proof:created","hospitalId":"H1","payload":{},"timestamp":1}"#,
        );
        assert!(matches!(result, Err(EnvelopeError::UnknownTopic(_))));
    }

    #[test]
    fn should_reject_missing_hospital_id() {
        let result =
            UpdateEnvelope::parse(r#"{"topic":"hospital:update","payload":{},"timestamp":1}"#);
        assert!(matches!(
            result,
            Err(EnvelopeError::MissingField("hospitalId"))
        ));
    }

    #[test]
    fn should_reject_missing_timestamp() {
        let result =
            UpdateEnvelope::parse(r#"{"topic":"hospital:update","hospitalId":"H1","payload":{}}"#);
        assert!(matches!(
            result,
            Err(EnvelopeError::MissingField("timestamp"))
        ));
    }

    #[test]
    fn should_reject_non_object_payload() {
        let result = UpdateEnvelope::parse(
            r#"{"topic":"hospital:update","hospitalId":"H1","payload":"beds","timestamp":1}"#,
        );
        assert!(matches!(
            result,
            Err(EnvelopeError::InvalidField("payload"))
        ));
    }

    #[test]
    fn should_reencode_to_wire_shape() {
        let text = r#"{"topic":"emergency:alert","hospitalId":"H2","payload":{"message":"Code red"},"timestamp":5}"#;
        let envelope = UpdateEnvelope::parse(text).unwrap();
        let reparsed = UpdateEnvelope::from_value(envelope.to_json()).unwrap();
        assert_eq!(reparsed, envelope);
    }
}
