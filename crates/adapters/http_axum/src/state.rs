//! Shared application state for axum handlers.

use std::sync::Arc;

use medsync_app::ports::{FacilitySource, PushTransport};
use medsync_app::session::SyncSession;

/// Application state shared across all axum handlers.
///
/// Generic over the push transport and facility source to avoid dynamic
/// dispatch. `Clone` is implemented manually so only the `Arc` is cloned.
pub struct AppState<T, S> {
    /// The sync session every handler reads from.
    pub session: Arc<SyncSession<T, S>>,
}

impl<T, S> Clone for AppState<T, S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<T, S> AppState<T, S>
where
    T: PushTransport,
    S: FacilitySource,
{
    pub fn new(session: SyncSession<T, S>) -> Self {
        Self {
            session: Arc::new(session),
        }
    }

    /// Use this when the session is also driven by background tasks.
    pub fn from_arc(session: Arc<SyncSession<T, S>>) -> Self {
        Self { session }
    }
}
