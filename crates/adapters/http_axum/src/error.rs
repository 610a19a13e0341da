//! HTTP error response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use medsync_app::freshness::RefreshError;
use medsync_domain::error::{MedSyncError, ValidationError};

/// JSON error body returned by API endpoints.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps engine errors to an HTTP response with an appropriate status code.
#[derive(Debug)]
pub enum ApiError {
    Domain(MedSyncError),
    Refresh(RefreshError),
}

impl From<MedSyncError> for ApiError {
    fn from(err: MedSyncError) -> Self {
        Self::Domain(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::Domain(err.into())
    }
}

impl From<RefreshError> for ApiError {
    fn from(err: RefreshError) -> Self {
        Self::Refresh(err)
    }
}

fn domain_status(err: &MedSyncError) -> (StatusCode, String) {
    match err {
        MedSyncError::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
        MedSyncError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string()),
        MedSyncError::Upstream(err) => {
            tracing::error!(error = %err, "upstream error");
            (StatusCode::BAD_GATEWAY, "upstream error".to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Domain(err) => domain_status(err),
            Self::Refresh(RefreshError::Fetch(err)) => domain_status(err),
            Self::Refresh(RefreshError::Cancelled) => (
                StatusCode::SERVICE_UNAVAILABLE,
                RefreshError::Cancelled.to_string(),
            ),
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use medsync_domain::error::NotFoundError;

    use super::*;

    #[test]
    fn should_map_validation_to_bad_request() {
        let response = ApiError::from(ValidationError::EmptyHospitalId).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn should_map_failed_fetch_of_unknown_id_to_not_found() {
        let err = MedSyncError::from(NotFoundError {
            entity: "Facility",
            id: "H9".to_string(),
        });
        let response = ApiError::from(RefreshError::Fetch(Arc::new(err))).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn should_map_upstream_to_bad_gateway() {
        let err = MedSyncError::Upstream("connection reset".into());
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn should_map_cancelled_refresh_to_unavailable() {
        let response = ApiError::from(RefreshError::Cancelled).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
