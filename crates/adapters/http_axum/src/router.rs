//! Axum router assembly.

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use medsync_app::ports::{FacilitySource, PushTransport};

use crate::state::AppState;

/// Build the top-level axum [`Router`].
///
/// Nests the read API under `/api`. Includes a [`TraceLayer`] that logs each
/// HTTP request/response at the `DEBUG` level using the `tracing` ecosystem.
pub fn build<T, S>(state: AppState<T, S>) -> Router
where
    T: PushTransport,
    S: FacilitySource,
{
    Router::new()
        .route("/health", get(health_check))
        .nest("/api", crate::api::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
