//! Sync session — the composition of every engine component for one login.
//!
//! A session owns the single push channel, the registry and the cache.
//! Views never build these themselves; they get a [`ViewScope`] from
//! [`SyncSession::mount_view`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use medsync_domain::connection::{AuthToken, ConnectionState};
use medsync_domain::facility::FacilityEntity;
use medsync_domain::id::HospitalId;

use crate::cache::{CacheStore, DEFAULT_MAX_IDLE};
use crate::dispatcher::MessageDispatcher;
use crate::freshness::{FreshnessConfig, FreshnessCoordinator};
use crate::lock;
use crate::ports::{FacilitySource, PushTransport};
use crate::registry::SubscriptionRegistry;
use crate::supervisor::{ConnectionSupervisor, FatalEvent, ReconnectPolicy};
use crate::view::ViewScope;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionConfig {
    /// Unused entries older than this are dropped.
    pub max_idle: Duration,
    /// How often the sweeper runs.
    pub sweep_interval: Duration,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            max_idle: DEFAULT_MAX_IDLE,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionConfig {
    pub freshness: FreshnessConfig,
    pub reconnect: ReconnectPolicy,
    pub eviction: EvictionConfig,
}

pub struct SyncSession<T, S> {
    cache: CacheStore,
    registry: SubscriptionRegistry,
    supervisor: ConnectionSupervisor<T>,
    freshness: FreshnessCoordinator<S>,
    eviction: EvictionConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<T: PushTransport, S: FacilitySource> SyncSession<T, S> {
    /// Wire every component. Nothing runs until [`SyncSession::start`].
    #[must_use]
    pub fn new(transport: T, source: S, config: SessionConfig) -> Self {
        let cache = CacheStore::default();
        let registry = SubscriptionRegistry::new();
        let dispatcher = MessageDispatcher::new(cache.clone(), registry.clone());
        let supervisor = ConnectionSupervisor::new(transport, dispatcher, config.reconnect);
        let freshness = FreshnessCoordinator::new(
            source,
            cache.clone(),
            supervisor.subscribe_state(),
            config.freshness,
        );
        Self {
            cache,
            registry,
            supervisor,
            freshness,
            eviction: config.eviction,
            sweeper: Mutex::new(None),
        }
    }

    /// Open the push channel and start the eviction sweeper.
    pub fn start(&self, token: AuthToken) {
        self.supervisor.connect(token);

        let mut sweeper = lock(&self.sweeper);
        if sweeper.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let cache = self.cache.clone();
        let registry = self.registry.clone();
        let freshness = self.freshness.clone();
        let eviction = self.eviction;
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(eviction.sweep_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                evict(&cache, &registry, &freshness, eviction.max_idle);
            }
        }));
        tracing::info!("sync session started");
    }

    /// Tear down the push channel, the sweeper and every watch.
    pub fn logout(&self) {
        self.supervisor.disconnect();
        if let Some(task) = lock(&self.sweeper).take() {
            task.abort();
        }
        self.freshness.clear();
        tracing::info!("sync session closed");
    }

    /// Give a view its own scope for subscriptions and watches.
    #[must_use]
    pub fn mount_view(&self, name: impl Into<String>) -> ViewScope<S> {
        ViewScope::new(
            name.into(),
            self.cache.clone(),
            self.registry.clone(),
            self.freshness.clone(),
        )
    }

    /// Run one eviction pass now.
    pub fn evict_idle(&self) -> Vec<HospitalId> {
        evict(
            &self.cache,
            &self.registry,
            &self.freshness,
            self.eviction.max_idle,
        )
    }

    /// Cached snapshot, or a fetch when the id is not cached yet.
    ///
    /// # Errors
    ///
    /// Returns the refresh error when the fetch fails.
    pub async fn get_or_fetch(
        &self,
        hospital_id: &HospitalId,
    ) -> Result<Arc<FacilityEntity>, crate::freshness::RefreshError> {
        match self.cache.get(hospital_id) {
            Some(entity) => Ok(entity),
            None => self.freshness.refresh_now(hospital_id).await,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    #[must_use]
    pub fn freshness(&self) -> &FreshnessCoordinator<S> {
        &self.freshness
    }

    #[must_use]
    pub fn supervisor(&self) -> &ConnectionSupervisor<T> {
        &self.supervisor
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    #[must_use]
    pub fn fatal_events(&self) -> broadcast::Receiver<FatalEvent> {
        self.supervisor.fatal_events()
    }
}

impl<T, S> Drop for SyncSession<T, S> {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.sweeper).take() {
            task.abort();
        }
        self.supervisor.disconnect();
    }
}

fn evict<S: FacilitySource>(
    cache: &CacheStore,
    registry: &SubscriptionRegistry,
    freshness: &FreshnessCoordinator<S>,
    max_idle: Duration,
) -> Vec<HospitalId> {
    let mut pinned: HashSet<HospitalId> = registry.watched_ids();
    pinned.extend(freshness.watched_ids());
    let evicted = cache.evict_idle(max_idle, &pinned);
    let pruned = freshness.prune_stale();
    if pruned > 0 {
        tracing::debug!(count = pruned, "forgot stale marks of unused facilities");
    }
    evicted
}
