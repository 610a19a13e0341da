//! JSON read API handler modules.

#[allow(clippy::missing_errors_doc)]
pub mod connection;
#[allow(clippy::missing_errors_doc)]
pub mod facilities;
#[allow(clippy::missing_errors_doc)]
pub mod sse;

use axum::Router;
use axum::routing::{get, post};

use medsync_app::ports::{FacilitySource, PushTransport};

use crate::state::AppState;

/// Build the `/api` sub-router.
pub fn routes<T, S>() -> Router<AppState<T, S>>
where
    T: PushTransport,
    S: FacilitySource,
{
    Router::new()
        // Facilities
        .route("/facilities", get(facilities::list::<T, S>))
        .route("/facilities/{id}", get(facilities::get::<T, S>))
        .route(
            "/facilities/{id}/refresh",
            post(facilities::refresh::<T, S>),
        )
        .route(
            "/facilities/{id}/stream",
            get(sse::facility_stream::<T, S>),
        )
        // Session
        .route("/connection", get(connection::status::<T, S>))
        .route("/events/stream", get(sse::stream::<T, S>))
}
