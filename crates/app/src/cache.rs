//! Cache store — canonical facility snapshots shared by every view.
//!
//! Entries are immutable `Arc<FacilityEntity>` snapshots. An accepted update
//! replaces the `Arc`, so two snapshots are the same state exactly when
//! [`Arc::ptr_eq`] says so. [`CacheStore::apply`] is the only writer.
//!
//! While the first fetch of an id is in flight (see [`CacheStore::expect`]),
//! pushes for it are held back and replayed on top of the fetched record,
//! so a push that overtakes the initial load is not lost.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::time::Instant;

use medsync_domain::facility::FacilityEntity;
use medsync_domain::id::{HospitalId, ListenerId};
use medsync_domain::merge::{MergeOutcome, MergeReport, merge};
use medsync_domain::time::Version;

use crate::lock;

/// Default idle time after which an unpinned entry may be evicted.
pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(10 * 60);

/// Pushes held back per id while its first fetch is in flight.
const MAX_DEFERRED: usize = 64;

/// Where an update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Push,
    Fetch,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The merge was accepted; this is the new snapshot.
    Applied(Arc<FacilityEntity>),
    /// The cached snapshot is newer than the update.
    Stale {
        current: Arc<FacilityEntity>,
        incoming: Version,
    },
    /// A push arrived for an id that was never fetched; nothing was folded.
    NotCached,
    /// A push arrived while the first fetch of its id is in flight; it is
    /// replayed once the fetch lands.
    Deferred,
}

/// One accepted change, as seen on [`CacheStore::changes`].
#[derive(Debug, Clone)]
pub struct CacheChange {
    pub entity: Arc<FacilityEntity>,
    pub source: UpdateSource,
}

type Listener = Arc<dyn Fn(&Arc<FacilityEntity>) + Send + Sync>;

struct Slot {
    entity: Arc<FacilityEntity>,
    last_read: Instant,
    last_push: Option<Instant>,
}

#[derive(Default)]
struct Deferred {
    expecting: usize,
    pushes: Vec<(Map<String, Value>, Version)>,
}

struct Inner {
    slots: Mutex<HashMap<HospitalId, Slot>>,
    // Locked after `slots` when both are held.
    deferred: Mutex<HashMap<HospitalId, Deferred>>,
    listeners: Mutex<HashMap<HospitalId, Vec<(ListenerId, Listener)>>>,
    changes: broadcast::Sender<CacheChange>,
}

/// Session-wide facility cache. Cloning shares the same store.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<Inner>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(256)
    }
}

impl CacheStore {
    /// Create an empty store whose change feed buffers `capacity` changes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                deferred: Mutex::new(HashMap::new()),
                listeners: Mutex::new(HashMap::new()),
                changes,
            }),
        }
    }

    /// Fold `patch` into the cached entity for `hospital_id`.
    ///
    /// A fetch for an unknown id starts from a vacant entity; a push for an
    /// unknown id is deferred when a fetch is expected, otherwise dropped.
    /// A fetch replays the deferred pushes of its id, each version-checked.
    /// Listeners run after the cache lock is released, so they may read the
    /// cache or register new listeners.
    pub fn apply(
        &self,
        hospital_id: &HospitalId,
        patch: &Map<String, Value>,
        version: Version,
        source: UpdateSource,
    ) -> ApplyOutcome {
        let now = Instant::now();
        let entity = {
            let mut slots = lock(&self.inner.slots);
            let base = match (slots.get(hospital_id), source) {
                (Some(slot), _) => Arc::clone(&slot.entity),
                (None, UpdateSource::Fetch) => Arc::new(FacilityEntity::vacant(hospital_id.clone())),
                (None, UpdateSource::Push) => return self.defer(hospital_id, patch, version),
            };

            let mut merged = match merge(&base, patch, version) {
                MergeOutcome::Applied(report) => {
                    log_report(hospital_id, &report);
                    Some(report.entity)
                }
                MergeOutcome::Stale { current, incoming } => {
                    tracing::debug!(
                        hospital_id = %hospital_id,
                        %current,
                        %incoming,
                        ?source,
                        "ignoring stale update"
                    );
                    None
                }
            };

            let mut replayed = false;
            if source == UpdateSource::Fetch {
                for (push, push_version) in self.take_deferred(hospital_id) {
                    let from = merged.as_ref().unwrap_or(&*base);
                    match merge(from, &push, push_version) {
                        MergeOutcome::Applied(report) => {
                            log_report(hospital_id, &report);
                            merged = Some(report.entity);
                            replayed = true;
                        }
                        MergeOutcome::Stale { incoming, .. } => {
                            tracing::debug!(hospital_id = %hospital_id, %incoming, "ignoring stale deferred push");
                        }
                    }
                }
            }

            let Some(merged) = merged else {
                return ApplyOutcome::Stale {
                    current: base,
                    incoming: version,
                };
            };

            let entity = Arc::new(merged);
            let pushed_at = (source == UpdateSource::Push || replayed).then_some(now);
            match slots.entry(hospital_id.clone()) {
                Entry::Occupied(mut occupied) => {
                    let slot = occupied.get_mut();
                    slot.entity = Arc::clone(&entity);
                    if pushed_at.is_some() {
                        slot.last_push = pushed_at;
                    }
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(Slot {
                        entity: Arc::clone(&entity),
                        last_read: now,
                        last_push: pushed_at,
                    });
                }
            }
            // Sent under the lock so the feed order matches the apply order.
            let _ = self.inner.changes.send(CacheChange {
                entity: Arc::clone(&entity),
                source,
            });
            entity
        };

        let listeners: Vec<Listener> = lock(&self.inner.listeners)
            .get(hospital_id)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();
        for listener in listeners {
            listener(&entity);
        }

        ApplyOutcome::Applied(entity)
    }

    /// Hold back pushes for `hospital_id` until the returned guard is dropped
    /// or a fetch lands. Used while the first fetch of an id is in flight.
    #[must_use = "dropping the guard stops deferring pushes"]
    pub fn expect(&self, hospital_id: &HospitalId) -> PendingFetch {
        lock(&self.inner.deferred)
            .entry(hospital_id.clone())
            .or_default()
            .expecting += 1;
        PendingFetch {
            hospital_id: hospital_id.clone(),
            store: Arc::downgrade(&self.inner),
        }
    }

    /// Number of pushes waiting for the first fetch of `hospital_id`.
    #[must_use]
    pub fn deferred_count(&self, hospital_id: &HospitalId) -> usize {
        lock(&self.inner.deferred)
            .get(hospital_id)
            .map_or(0, |deferred| deferred.pushes.len())
    }

    fn defer(&self, hospital_id: &HospitalId, patch: &Map<String, Value>, version: Version) -> ApplyOutcome {
        let mut deferred = lock(&self.inner.deferred);
        let Some(entry) = deferred.get_mut(hospital_id) else {
            return ApplyOutcome::NotCached;
        };
        if entry.pushes.len() == MAX_DEFERRED {
            tracing::warn!(hospital_id = %hospital_id, "too many pushes before first fetch, dropping oldest");
            entry.pushes.remove(0);
        }
        entry.pushes.push((patch.clone(), version));
        ApplyOutcome::Deferred
    }

    fn take_deferred(&self, hospital_id: &HospitalId) -> Vec<(Map<String, Value>, Version)> {
        lock(&self.inner.deferred)
            .get_mut(hospital_id)
            .map(|deferred| std::mem::take(&mut deferred.pushes))
            .unwrap_or_default()
    }

    /// Current snapshot for `hospital_id`; counts as a read for eviction.
    #[must_use]
    pub fn get(&self, hospital_id: &HospitalId) -> Option<Arc<FacilityEntity>> {
        let mut slots = lock(&self.inner.slots);
        let slot = slots.get_mut(hospital_id)?;
        slot.last_read = Instant::now();
        Some(Arc::clone(&slot.entity))
    }

    /// Current snapshot without touching the read clock.
    #[must_use]
    pub fn peek(&self, hospital_id: &HospitalId) -> Option<Arc<FacilityEntity>> {
        lock(&self.inner.slots)
            .get(hospital_id)
            .map(|slot| Arc::clone(&slot.entity))
    }

    #[must_use]
    pub fn contains(&self, hospital_id: &HospitalId) -> bool {
        lock(&self.inner.slots).contains_key(hospital_id)
    }

    /// Every cached snapshot, ordered by hospital id.
    #[must_use]
    pub fn get_all(&self) -> Vec<Arc<FacilityEntity>> {
        let now = Instant::now();
        let mut slots = lock(&self.inner.slots);
        let mut all: Vec<Arc<FacilityEntity>> = slots
            .values_mut()
            .map(|slot| {
                slot.last_read = now;
                Arc::clone(&slot.entity)
            })
            .collect();
        drop(slots);
        all.sort_by(|a, b| a.hospital_id.cmp(&b.hospital_id));
        all
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner.slots).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a push for `hospital_id` was folded within `window`.
    #[must_use]
    pub fn pushed_within(&self, hospital_id: &HospitalId, window: Duration) -> bool {
        lock(&self.inner.slots)
            .get(hospital_id)
            .and_then(|slot| slot.last_push)
            .is_some_and(|at| at.elapsed() < window)
    }

    /// Register a per-entity listener, called with every accepted snapshot.
    ///
    /// The listener stays registered until the returned guard is dropped.
    #[must_use = "dropping the guard removes the listener"]
    pub fn on_change<F>(&self, hospital_id: HospitalId, listener: F) -> ChangeListener
    where
        F: Fn(&Arc<FacilityEntity>) + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        lock(&self.inner.listeners)
            .entry(hospital_id.clone())
            .or_default()
            .push((id, Arc::new(listener)));
        ChangeListener {
            id,
            hospital_id,
            store: Arc::downgrade(&self.inner),
        }
    }

    /// Feed of every accepted change across all entities.
    #[must_use]
    pub fn changes(&self) -> broadcast::Receiver<CacheChange> {
        self.inner.changes.subscribe()
    }

    /// Drop entries nobody uses any more.
    ///
    /// An entry survives when it is `pinned` (subscribed or watched), has a
    /// change listener, has a snapshot still held outside the cache, or was
    /// read within `max_idle`. Returns the evicted ids.
    pub fn evict_idle(&self, max_idle: Duration, pinned: &HashSet<HospitalId>) -> Vec<HospitalId> {
        let listened: HashSet<HospitalId> = lock(&self.inner.listeners)
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(id, _)| id.clone())
            .collect();

        let mut evicted = Vec::new();
        lock(&self.inner.slots).retain(|id, slot| {
            let keep = pinned.contains(id)
                || listened.contains(id)
                || Arc::strong_count(&slot.entity) > 1
                || slot.last_read.elapsed() < max_idle;
            if !keep {
                evicted.push(id.clone());
            }
            keep
        });

        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "evicted idle facilities");
        }
        evicted
    }
}

fn log_report(hospital_id: &HospitalId, report: &MergeReport) {
    for rejection in &report.rejected {
        tracing::warn!(
            hospital_id = %hospital_id,
            field = %rejection.field,
            reason = %rejection.reason,
            "rejected invalid field value"
        );
    }
    for clamp in &report.clamped {
        tracing::debug!(
            hospital_id = %hospital_id,
            field = clamp.field,
            requested = clamp.requested,
            applied = clamp.applied,
            "clamped field value"
        );
    }
}

/// Guard returned by [`CacheStore::expect`].
pub struct PendingFetch {
    hospital_id: HospitalId,
    store: Weak<Inner>,
}

impl Drop for PendingFetch {
    fn drop(&mut self) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        let mut deferred = lock(&store.deferred);
        if let Some(entry) = deferred.get_mut(&self.hospital_id) {
            entry.expecting -= 1;
            if entry.expecting == 0 {
                deferred.remove(&self.hospital_id);
            }
        }
    }
}

/// Guard returned by [`CacheStore::on_change`]; dropping it unregisters.
pub struct ChangeListener {
    id: ListenerId,
    hospital_id: HospitalId,
    store: Weak<Inner>,
}

impl ChangeListener {
    #[must_use]
    pub fn hospital_id(&self) -> &HospitalId {
        &self.hospital_id
    }
}

impl Drop for ChangeListener {
    fn drop(&mut self) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        let mut listeners = lock(&store.listeners);
        if let Some(list) = listeners.get_mut(&self.hospital_id) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                listeners.remove(&self.hospital_id);
            }
        }
    }
}
