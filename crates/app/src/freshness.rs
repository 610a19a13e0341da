//! Freshness coordinator — bounded staleness without redundant fetches.
//!
//! Each watched facility gets exactly one refresh timer, however many views
//! watch it. Concurrent refreshes of the same facility share one request.
//! A recent push lets the timer skip its cycle, and a push channel that is
//! not `Connected` shortens the interval.
//!
//! Every fetch holds a ticket in the in-flight table. Removing the entry
//! (last watcher gone, or [`FreshnessCoordinator::clear`]) cancels it: a
//! fetch that completes after teardown (or after a rapid remount) is
//! discarded instead of applied.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use medsync_domain::connection::ConnectionState;
use medsync_domain::error::MedSyncError;
use medsync_domain::facility::FacilityEntity;
use medsync_domain::id::HospitalId;

use crate::cache::{ApplyOutcome, CacheStore, UpdateSource};
use crate::lock;
use crate::ports::{DirectoryQuery, FacilitySource, Pagination};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessConfig {
    /// Maximum staleness while the push channel is connected.
    pub interval: Duration,
    /// Interval used while the push channel is down or degraded.
    pub degraded_interval: Duration,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            degraded_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshError {
    #[error("facility fetch failed")]
    Fetch(#[source] Arc<MedSyncError>),

    /// The watch this fetch belonged to was torn down before it completed.
    #[error("refresh was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreshnessEvent {
    Refreshed(HospitalId),
    /// A fetch failed; the last-known value stays in the cache.
    Stale { hospital_id: HospitalId, reason: String },
}

/// Result of a directory refresh.
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    pub facilities: Vec<Arc<FacilityEntity>>,
    pub pagination: Option<Pagination>,
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<FacilityEntity>, RefreshError>>>;
type SharedDirectory = Shared<BoxFuture<'static, Result<DirectorySnapshot, RefreshError>>>;

struct Tracked {
    lease: u64,
    watchers: usize,
    timer: JoinHandle<()>,
    reset: Arc<Notify>,
}

struct InFlight<F> {
    ticket: u64,
    fetch: F,
}

#[derive(Default)]
struct TrackTable {
    tracked: HashMap<HospitalId, Tracked>,
    in_flight: HashMap<HospitalId, InFlight<SharedFetch>>,
    directory: HashMap<DirectoryQuery, InFlight<SharedDirectory>>,
    stale: HashSet<HospitalId>,
    next_lease: u64,
    next_ticket: u64,
}

impl TrackTable {
    fn issue_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    /// Remove the in-flight entry of a completed fetch. `false` when the
    /// fetch was cancelled in the meantime.
    fn settle(&mut self, hospital_id: &HospitalId, ticket: u64) -> bool {
        let current = self
            .in_flight
            .get(hospital_id)
            .is_some_and(|in_flight| in_flight.ticket == ticket);
        if current {
            self.in_flight.remove(hospital_id);
        }
        current
    }

    fn settle_directory(&mut self, query: &DirectoryQuery, ticket: u64) -> bool {
        let current = self
            .directory
            .get(query)
            .is_some_and(|in_flight| in_flight.ticket == ticket);
        if current {
            self.directory.remove(query);
        }
        current
    }
}

struct Inner<S> {
    source: S,
    cache: CacheStore,
    config: FreshnessConfig,
    connection: watch::Receiver<ConnectionState>,
    table: Mutex<TrackTable>,
    events: broadcast::Sender<FreshnessEvent>,
}

pub struct FreshnessCoordinator<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for FreshnessCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: FacilitySource> FreshnessCoordinator<S> {
    #[must_use]
    pub fn new(
        source: S,
        cache: CacheStore,
        connection: watch::Receiver<ConnectionState>,
        config: FreshnessConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                source,
                cache,
                config,
                connection,
                table: Mutex::new(TrackTable::default()),
                events,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> FreshnessConfig {
        self.inner.config
    }

    /// Keep `hospital_id` fresh for as long as the returned guard lives.
    ///
    /// The first watch of an id that is not cached yet triggers an initial
    /// load in the background.
    #[must_use = "dropping the guard stops watching immediately"]
    pub fn watch(&self, hospital_id: HospitalId) -> WatchGuard {
        let lease = {
            let mut guard = lock(&self.inner.table);
            let table = &mut *guard;
            let next_lease = table.next_lease;
            match table.tracked.entry(hospital_id.clone()) {
                Entry::Occupied(mut occupied) => {
                    let tracked = occupied.get_mut();
                    tracked.watchers += 1;
                    tracked.lease
                }
                Entry::Vacant(vacant) => {
                    let reset = Arc::new(Notify::new());
                    let timer = tokio::spawn(refresh_timer(
                        Arc::downgrade(&self.inner),
                        hospital_id.clone(),
                        Arc::clone(&reset),
                        self.inner.connection.clone(),
                    ));
                    vacant.insert(Tracked {
                        lease: next_lease,
                        watchers: 1,
                        timer,
                        reset,
                    });
                    table.next_lease += 1;
                    tracing::debug!(hospital_id = %hospital_id, "started refresh timer");
                    next_lease
                }
            }
        };

        if !self.inner.cache.contains(&hospital_id) {
            // The shared fetch runs in its own task; nothing needs to poll it.
            drop(Inner::start_fetch(&self.inner, &hospital_id));
        }

        let unwatch: Weak<dyn Unwatch> = Arc::downgrade(&self.inner) as Weak<dyn Unwatch>;
        WatchGuard {
            hospital_id,
            lease,
            coordinator: unwatch,
        }
    }

    /// Refetch `hospital_id` now.
    ///
    /// Concurrent callers share one request and receive the same result.
    /// On completion the periodic timer restarts its interval.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError::Fetch`] when the source fails (the cached
    /// value is kept and marked stale) and [`RefreshError::Cancelled`] when
    /// the watch was torn down while the fetch was in flight.
    ///
    /// A failed refresh also restarts the interval, so the timer does not
    /// retry right behind a manual attempt.
    pub async fn refresh_now(
        &self,
        hospital_id: &HospitalId,
    ) -> Result<Arc<FacilityEntity>, RefreshError> {
        Inner::start_fetch(&self.inner, hospital_id).await
    }

    /// Fetch one directory page and merge every entry.
    ///
    /// Concurrent calls with an equal query share one request.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError::Fetch`] when the source fails and
    /// [`RefreshError::Cancelled`] when the coordinator was cleared while
    /// the page was in flight.
    pub async fn refresh_directory(
        &self,
        query: &DirectoryQuery,
    ) -> Result<DirectorySnapshot, RefreshError> {
        let fetch = {
            let mut table = lock(&self.inner.table);
            if let Some(in_flight) = table.directory.get(query) {
                in_flight.fetch.clone()
            } else {
                let ticket = table.issue_ticket();
                let inner = Arc::clone(&self.inner);
                let owned = query.clone();
                let handle = tokio::spawn(async move { inner.fetch_directory(owned, ticket).await });
                let fetch = join_shared(handle);
                table.directory.insert(
                    query.clone(),
                    InFlight {
                        ticket,
                        fetch: fetch.clone(),
                    },
                );
                fetch
            }
        };
        fetch.await
    }

    #[must_use]
    pub fn is_stale(&self, hospital_id: &HospitalId) -> bool {
        lock(&self.inner.table).stale.contains(hospital_id)
    }

    /// Ids whose last fetch failed, sorted.
    #[must_use]
    pub fn stale_ids(&self) -> Vec<HospitalId> {
        let mut ids: Vec<_> = lock(&self.inner.table).stale.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop failure marks of ids that are neither watched, cached nor being
    /// fetched. Returns how many were dropped.
    pub fn prune_stale(&self) -> usize {
        let mut guard = lock(&self.inner.table);
        let table = &mut *guard;
        let before = table.stale.len();
        table.stale.retain(|hospital_id| {
            table.tracked.contains_key(hospital_id)
                || table.in_flight.contains_key(hospital_id)
                || self.inner.cache.contains(hospital_id)
        });
        before - table.stale.len()
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        let table = lock(&self.inner.table);
        table.in_flight.len() + table.directory.len()
    }

    #[must_use]
    pub fn watcher_count(&self, hospital_id: &HospitalId) -> usize {
        lock(&self.inner.table)
            .tracked
            .get(hospital_id)
            .map_or(0, |tracked| tracked.watchers)
    }

    #[must_use]
    pub fn watched_ids(&self) -> HashSet<HospitalId> {
        lock(&self.inner.table).tracked.keys().cloned().collect()
    }

    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<FreshnessEvent> {
        self.inner.events.subscribe()
    }

    /// Stop every timer and invalidate every in-flight fetch.
    ///
    /// Outstanding [`WatchGuard`]s become inert.
    pub fn clear(&self) {
        let mut table = lock(&self.inner.table);
        for (_, entry) in table.tracked.drain() {
            entry.timer.abort();
        }
        table.in_flight.clear();
        table.directory.clear();
        table.stale.clear();
    }
}

impl<S: FacilitySource> Inner<S> {
    /// Join the in-flight fetch for `hospital_id`, or start one.
    fn start_fetch(this: &Arc<Self>, hospital_id: &HospitalId) -> SharedFetch {
        let mut table = lock(&this.table);
        if let Some(in_flight) = table.in_flight.get(hospital_id) {
            return in_flight.fetch.clone();
        }

        let ticket = table.issue_ticket();
        // Pushes that overtake the first load are replayed onto it.
        let pending = (!this.cache.contains(hospital_id)).then(|| this.cache.expect(hospital_id));
        let inner = Arc::clone(this);
        let owned = hospital_id.clone();
        let handle = tokio::spawn(async move {
            let result = inner.fetch_and_apply(owned, ticket).await;
            drop(pending);
            result
        });
        let fetch = join_shared(handle);
        table.in_flight.insert(
            hospital_id.clone(),
            InFlight {
                ticket,
                fetch: fetch.clone(),
            },
        );
        fetch
    }

    async fn fetch_and_apply(
        &self,
        hospital_id: HospitalId,
        ticket: u64,
    ) -> Result<Arc<FacilityEntity>, RefreshError> {
        let result = self.source.fetch_one(&hospital_id).await;

        if !lock(&self.table).settle(&hospital_id, ticket) {
            tracing::debug!(hospital_id = %hospital_id, "discarding cancelled fetch");
            return Err(RefreshError::Cancelled);
        }

        match result {
            Ok(fetched) => {
                let entity = match self.cache.apply(
                    &hospital_id,
                    &fetched.payload,
                    fetched.version,
                    UpdateSource::Fetch,
                ) {
                    ApplyOutcome::Applied(entity) | ApplyOutcome::Stale { current: entity, .. } => {
                        entity
                    }
                    ApplyOutcome::NotCached | ApplyOutcome::Deferred => {
                        return Err(RefreshError::Cancelled);
                    }
                };
                self.mark_fresh(&hospital_id);
                Ok(entity)
            }
            Err(err) => {
                tracing::warn!(hospital_id = %hospital_id, error = %err, "facility refresh failed, keeping last known value");
                self.mark_stale(&hospital_id, &err);
                Err(RefreshError::Fetch(Arc::new(err)))
            }
        }
    }

    async fn fetch_directory(
        &self,
        query: DirectoryQuery,
        ticket: u64,
    ) -> Result<DirectorySnapshot, RefreshError> {
        let result = self.source.fetch_directory(&query).await;
        if !lock(&self.table).settle_directory(&query, ticket) {
            tracing::debug!("discarding cancelled directory refresh");
            return Err(RefreshError::Cancelled);
        }

        let page = result.map_err(|err| {
            tracing::warn!(error = %err, "directory refresh failed");
            RefreshError::Fetch(Arc::new(err))
        })?;

        let mut facilities = Vec::with_capacity(page.entries.len());
        for fetched in page.entries {
            match self.cache.apply(
                &fetched.hospital_id,
                &fetched.payload,
                fetched.version,
                UpdateSource::Fetch,
            ) {
                ApplyOutcome::Applied(entity) | ApplyOutcome::Stale { current: entity, .. } => {
                    self.mark_fresh(&fetched.hospital_id);
                    facilities.push(entity);
                }
                ApplyOutcome::NotCached | ApplyOutcome::Deferred => {}
            }
        }
        tracing::debug!(count = facilities.len(), "directory refreshed");

        Ok(DirectorySnapshot {
            facilities,
            pagination: page.pagination,
        })
    }

    fn mark_fresh(&self, hospital_id: &HospitalId) {
        {
            let mut table = lock(&self.table);
            table.stale.remove(hospital_id);
            if let Some(tracked) = table.tracked.get(hospital_id) {
                tracked.reset.notify_one();
            }
        }
        let _ = self
            .events
            .send(FreshnessEvent::Refreshed(hospital_id.clone()));
    }

    fn mark_stale(&self, hospital_id: &HospitalId, err: &MedSyncError) {
        {
            let mut table = lock(&self.table);
            table.stale.insert(hospital_id.clone());
            if let Some(tracked) = table.tracked.get(hospital_id) {
                tracked.reset.notify_one();
            }
        }
        let _ = self.events.send(FreshnessEvent::Stale {
            hospital_id: hospital_id.clone(),
            reason: err.to_string(),
        });
    }

    fn current_interval(&self, state: &ConnectionState) -> Duration {
        if state.is_connected() {
            self.config.interval
        } else {
            self.config.degraded_interval
        }
    }
}

/// Turn a spawned task into a cloneable future of its output.
fn join_shared<T>(handle: JoinHandle<Result<T, RefreshError>>) -> Shared<BoxFuture<'static, Result<T, RefreshError>>>
where
    T: Clone + Send + 'static,
{
    async move { handle.await.unwrap_or(Err(RefreshError::Cancelled)) }
        .boxed()
        .shared()
}

/// One timer per watched facility.
///
/// Holds only a weak reference so a dropped coordinator stops its timers.
async fn refresh_timer<S: FacilitySource>(
    inner: Weak<Inner<S>>,
    hospital_id: HospitalId,
    reset: Arc<Notify>,
    mut connection: watch::Receiver<ConnectionState>,
) {
    let mut cycle_start = Instant::now();
    let mut connection_open = true;
    loop {
        let interval = {
            let Some(strong) = inner.upgrade() else {
                return;
            };
            let state = connection.borrow().clone();
            strong.current_interval(&state)
        };

        tokio::select! {
            () = tokio::time::sleep_until(cycle_start + interval) => {}
            () = reset.notified() => {
                cycle_start = Instant::now();
                continue;
            }
            changed = connection.changed(), if connection_open => {
                if changed.is_err() {
                    connection_open = false;
                }
                continue;
            }
        }
        cycle_start = Instant::now();

        let fetch = {
            let Some(strong) = inner.upgrade() else {
                return;
            };
            if strong.cache.pushed_within(&hospital_id, interval / 2) {
                tracing::trace!(hospital_id = %hospital_id, "recent push, skipping refresh");
                continue;
            }
            Inner::start_fetch(&strong, &hospital_id)
        };
        let _ = fetch.await;
    }
}

trait Unwatch: Send + Sync {
    fn unwatch(&self, hospital_id: &HospitalId, lease: u64);
}

impl<S: Send + Sync> Unwatch for Inner<S> {
    fn unwatch(&self, hospital_id: &HospitalId, lease: u64) {
        let mut table = lock(&self.table);
        let Some(tracked) = table.tracked.get_mut(hospital_id) else {
            return;
        };
        if tracked.lease != lease {
            return;
        }
        tracked.watchers -= 1;
        if tracked.watchers > 0 {
            return;
        }
        if let Some(tracked) = table.tracked.remove(hospital_id) {
            tracked.timer.abort();
        }
        table.in_flight.remove(hospital_id);
        tracing::debug!(hospital_id = %hospital_id, "stopped refresh timer");
    }
}

/// Keeps one facility fresh while alive. Dropping it unwatches.
pub struct WatchGuard {
    hospital_id: HospitalId,
    lease: u64,
    coordinator: Weak<dyn Unwatch>,
}

impl WatchGuard {
    #[must_use]
    pub fn hospital_id(&self) -> &HospitalId {
        &self.hospital_id
    }
}

impl std::fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchGuard")
            .field("hospital_id", &self.hospital_id)
            .finish_non_exhaustive()
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.unwatch(&self.hospital_id, self.lease);
        }
    }
}
