//! Server-Sent Events (SSE) streams for real-time updates.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};

use medsync_app::cache::{CacheChange, UpdateSource};
use medsync_app::ports::{FacilitySource, PushTransport};
use medsync_domain::facility::FacilityEntity;
use medsync_domain::id::HospitalId;
use medsync_domain::topic::Topic;

use crate::error::ApiError;
use crate::state::AppState;

/// Buffered updates per facility stream before new ones are dropped.
const FACILITY_STREAM_CAPACITY: usize = 64;

fn change_json(change: &CacheChange) -> Value {
    let source = match change.source {
        UpdateSource::Push => "push",
        UpdateSource::Fetch => "fetch",
    };
    json!({ "source": source, "facility": &*change.entity })
}

/// `GET /api/events/stream` — SSE stream of every accepted cache change.
///
/// Each change is sent as a `facility` event whose data is
/// `{ "source": "push"|"fetch", "facility": {...} }`.
pub async fn stream<T, S>(
    State(state): State<AppState<T, S>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>
where
    T: PushTransport,
    S: FacilitySource,
{
    let changes = state.session.cache().changes();
    let event_stream = BroadcastStream::new(changes).filter_map(|result| match result {
        Ok(change) => Some(Ok(Event::default()
            .event("facility")
            .data(change_json(&change).to_string()))),
        Err(BroadcastStreamRecvError::Lagged(n)) => {
            tracing::warn!(
                skipped = n,
                "SSE subscriber lagged, some changes were dropped"
            );
            None
        }
    });

    Sse::new(event_stream).keep_alive(KeepAlive::default())
}

enum FacilityUpdate {
    Snapshot(FacilityEntity),
    Push(Topic, Value),
}

impl FacilityUpdate {
    fn into_event(self) -> Event {
        match self {
            Self::Snapshot(entity) => match serde_json::to_string(&entity) {
                Ok(data) => Event::default().event("facility").data(data),
                Err(err) => {
                    tracing::warn!(%err, "failed to serialize facility for SSE stream");
                    Event::default().comment("serialization failed")
                }
            },
            Self::Push(topic, payload) => Event::default()
                .event(topic.as_str())
                .data(payload.to_string()),
        }
    }
}

/// `GET /api/facilities/{id}/stream` — SSE stream for one facility.
///
/// The connection mounts its own view: it subscribes to every topic of the
/// facility and keeps it fresh until the client disconnects. Snapshots are
/// sent as `facility` events, raw push payloads under their topic name.
pub async fn facility_stream<T, S>(
    State(state): State<AppState<T, S>>,
    Path(id): Path<String>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, ApiError>
where
    T: PushTransport,
    S: FacilitySource,
{
    let hospital_id = HospitalId::new(id)?;
    let (tx, rx) = mpsc::channel(FACILITY_STREAM_CAPACITY);
    let mut view = state.session.mount_view(format!("sse:{hospital_id}"));

    if let Some(entity) = view.get(&hospital_id) {
        let _ = tx.try_send(FacilityUpdate::Snapshot(FacilityEntity::clone(&entity)));
    }
    for topic in Topic::ALL {
        let tx = tx.clone();
        view.subscribe(topic, hospital_id.clone(), move |payload| {
            if tx.try_send(FacilityUpdate::Push(topic, payload.clone())).is_err() {
                tracing::warn!(%topic, "SSE facility stream full, dropping update");
            }
        });
    }
    let snapshots = tx;
    view.on_change(hospital_id.clone(), move |entity| {
        if snapshots
            .try_send(FacilityUpdate::Snapshot(FacilityEntity::clone(entity)))
            .is_err()
        {
            tracing::warn!("SSE facility stream full, dropping snapshot");
        }
    });
    view.watch(hospital_id);

    let event_stream = ReceiverStream::new(rx).map(move |update| {
        // The view lives exactly as long as the client connection.
        let _mounted = &view;
        Ok(update.into_event())
    });
    Ok(Sse::new(event_stream).keep_alive(KeepAlive::default()))
}
