//! # medsync-app
//!
//! Application layer — the sync engine and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `PushTransport` — open the shared push channel
//!   - `FacilitySource` — fetch one facility or a directory page
//! - Provide the **in-process engine**:
//!   - `CacheStore` — canonical facility snapshots, the only writer is `apply`
//!   - `SubscriptionRegistry` — many independent callbacks per `(topic, hospital)`
//!   - `MessageDispatcher` — route push frames into the cache and the registry
//!   - `ConnectionSupervisor` — one push channel per session, reconnect with backoff
//!   - `FreshnessCoordinator` — bounded staleness through deduplicated refetches
//! - Compose them into a `SyncSession` and hand out `ViewScope`s to views
//!
//! ## Dependency rule
//! Depends on `medsync-domain` only (plus `tokio` and `futures` for plumbing).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod cache;
pub mod dispatcher;
pub mod freshness;
pub mod ports;
pub mod registry;
pub mod session;
pub mod supervisor;
pub mod view;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Every critical section in this crate leaves its data consistent before
/// calling out, so a poisoned lock still guards valid state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
