//! REST adapter error types.

use medsync_domain::error::{MedSyncError, NotFoundError};

/// Errors specific to the hospitals REST adapter.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),

    /// The request failed before a response arrived (DNS, TLS, timeout, …).
    #[error("request to hospitals API failed")]
    Request(#[source] reqwest::Error),

    /// The server does not know the requested facility.
    #[error("facility {0} not found")]
    NotFound(String),

    /// The server answered with a non-success status.
    #[error("hospitals API answered HTTP {status}")]
    Status { status: u16, body: String },

    /// The response body is not the expected JSON.
    #[error("failed to decode hospitals API response")]
    Decode(#[source] serde_json::Error),

    /// The response is JSON but not the expected shape.
    #[error("unexpected response shape: {0}")]
    Malformed(&'static str),
}

impl RestError {
    /// Convert into a [`MedSyncError`] for propagation across port
    /// boundaries. A 404 keeps its meaning; everything else is upstream.
    #[must_use]
    pub fn into_domain(self) -> MedSyncError {
        match self {
            Self::NotFound(id) => NotFoundError {
                entity: "Facility",
                id,
            }
            .into(),
            other => MedSyncError::Upstream(Box::new(other)),
        }
    }
}

impl From<RestError> for MedSyncError {
    fn from(err: RestError) -> Self {
        err.into_domain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_convert_not_found_to_domain_not_found() {
        let err: MedSyncError = RestError::NotFound("H9".to_string()).into();
        assert!(matches!(err, MedSyncError::NotFound(ref e) if e.id == "H9"));
    }

    #[test]
    fn should_convert_status_to_upstream_error() {
        let err: MedSyncError = RestError::Status {
            status: 503,
            body: String::new(),
        }
        .into();
        assert!(matches!(err, MedSyncError::Upstream(_)));
    }

    #[test]
    fn should_display_status_code() {
        let err = RestError::Status {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "hospitals API answered HTTP 502");
    }

    #[test]
    fn should_display_decode_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{{bad").unwrap_err();
        let err = RestError::Decode(json_err);
        assert_eq!(err.to_string(), "failed to decode hospitals API response");
    }
}
