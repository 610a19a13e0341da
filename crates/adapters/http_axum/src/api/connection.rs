//! Session health for views deciding whether to show a staleness banner.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use medsync_app::ports::{FacilitySource, PushTransport};
use medsync_domain::connection::ConnectionState;
use medsync_domain::id::HospitalId;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ConnectionBody {
    pub connection: ConnectionState,
    /// Facilities whose last refresh failed; their cached value is kept.
    pub stale: Vec<HospitalId>,
    pub cached: usize,
    pub watched: usize,
}

/// `GET /api/connection`
pub async fn status<T, S>(State(state): State<AppState<T, S>>) -> Json<ConnectionBody>
where
    T: PushTransport,
    S: FacilitySource,
{
    let session = &state.session;
    Json(ConnectionBody {
        connection: session.connection_state(),
        stale: session.freshness().stale_ids(),
        cached: session.cache().len(),
        watched: session.freshness().watched_ids().len(),
    })
}
