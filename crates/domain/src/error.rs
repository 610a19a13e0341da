//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into [`MedSyncError`]
//! at port boundaries via `#[from]` or an `into_domain()` helper.

/// Top-level error crossing port boundaries.
#[derive(Debug, thiserror::Error)]
pub enum MedSyncError {
    #[error("validation error")]
    Validation(#[from] ValidationError),

    #[error("not found")]
    NotFound(#[from] NotFoundError),

    /// An external collaborator (REST API, push channel) failed.
    #[error("upstream error")]
    Upstream(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Domain invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("hospital id must not be empty")]
    EmptyHospitalId,

    #[error("name must not be empty")]
    EmptyName,

    #[error("available beds ({available}) exceed total beds ({total})")]
    AvailableExceedsTotal { available: u32, total: u32 },

    #[error("occupancy rate must be within 0..=100")]
    OccupancyOutOfRange,
}

/// A looked-up resource does not exist.
#[derive(Debug, thiserror::Error)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_convert_validation_error_into_medsync_error() {
        let err: MedSyncError = ValidationError::EmptyName.into();
        assert!(matches!(
            err,
            MedSyncError::Validation(ValidationError::EmptyName)
        ));
    }

    #[test]
    fn should_display_not_found_with_entity_and_id() {
        let err = NotFoundError {
            entity: "Facility",
            id: "H1".to_string(),
        };
        assert_eq!(err.to_string(), "Facility H1 not found");
    }

    #[test]
    fn should_display_bed_invariant_violation() {
        let err = ValidationError::AvailableExceedsTotal {
            available: 12,
            total: 10,
        };
        assert_eq!(
            err.to_string(),
            "available beds (12) exceed total beds (10)"
        );
    }
}
