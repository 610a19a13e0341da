//! Topic — the routing key of a push update.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Named category of push update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "hospital:update")]
    HospitalUpdate,
    #[serde(rename = "hospital:bed-status")]
    BedStatus,
    #[serde(rename = "hospital:availability")]
    Availability,
    #[serde(rename = "department:update")]
    DepartmentUpdate,
    #[serde(rename = "emergency:alert")]
    EmergencyAlert,
}

impl Topic {
    pub const ALL: [Self; 5] = [
        Self::HospitalUpdate,
        Self::BedStatus,
        Self::Availability,
        Self::DepartmentUpdate,
        Self::EmergencyAlert,
    ];

    /// Wire name of the topic.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HospitalUpdate => "hospital:update",
            Self::BedStatus => "hospital:bed-status",
            Self::Availability => "hospital:availability",
            Self::DepartmentUpdate => "department:update",
            Self::EmergencyAlert => "emergency:alert",
        }
    }

    /// Whether payloads of this topic fold into the cached facility.
    ///
    /// Emergency alerts are notifications only: they are fanned out to
    /// subscribers but never change facility state.
    #[must_use]
    pub const fn folds_into_entity(self) -> bool {
        !matches!(self, Self::EmergencyAlert)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown topic name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown topic `{0}`")]
pub struct UnknownTopic(pub String);

impl FromStr for Topic {
    type Err = UnknownTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| UnknownTopic(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_every_wire_name() {
        for topic in Topic::ALL {
            assert_eq!(topic.as_str().parse::<Topic>(), Ok(topic));
        }
    }

    #[test]
    fn should_reject_unknown_topic() {
        assert_eq!(
            "hospital:capacity".parse::<Topic>(),
            Err(UnknownTopic("hospital:capacity".to_string()))
        );
    }

    #[test]
    fn should_serialize_to_wire_name() {
        let json = serde_json::to_string(&Topic::BedStatus).unwrap();
        assert_eq!(json, "\"hospital:bed-status\"");
    }

    #[test]
    fn should_not_fold_emergency_alerts() {
        assert!(!Topic::EmergencyAlert.folds_into_entity());
        assert!(Topic::DepartmentUpdate.folds_into_entity());
    }
}
