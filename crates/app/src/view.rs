//! View scope — everything one mounted view holds on the session.
//!
//! Dropping the scope unsubscribes every callback, removes every change
//! listener and releases every watch in one step, so an unmounted view
//! cannot leak timers or handlers.

use std::sync::Arc;

use serde_json::Value;

use medsync_domain::facility::FacilityEntity;
use medsync_domain::id::HospitalId;
use medsync_domain::topic::Topic;

use crate::cache::{CacheStore, ChangeListener};
use crate::freshness::{FreshnessCoordinator, RefreshError, WatchGuard};
use crate::ports::FacilitySource;
use crate::registry::{Subscription, SubscriptionRegistry};

pub struct ViewScope<S> {
    name: String,
    cache: CacheStore,
    registry: SubscriptionRegistry,
    freshness: FreshnessCoordinator<S>,
    subscriptions: Vec<Subscription>,
    listeners: Vec<ChangeListener>,
    watches: Vec<WatchGuard>,
}

impl<S: FacilitySource> ViewScope<S> {
    pub(crate) fn new(
        name: String,
        cache: CacheStore,
        registry: SubscriptionRegistry,
        freshness: FreshnessCoordinator<S>,
    ) -> Self {
        tracing::debug!(view = %name, "view mounted");
        Self {
            name,
            cache,
            registry,
            freshness,
            subscriptions: Vec::new(),
            listeners: Vec::new(),
            watches: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receive push payloads for `(topic, hospital_id)` while mounted.
    pub fn subscribe<F>(&mut self, topic: Topic, hospital_id: HospitalId, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let subscription = self.registry.subscribe(topic, hospital_id, callback);
        self.subscriptions.push(subscription);
    }

    /// Receive every accepted snapshot of `hospital_id` while mounted.
    pub fn on_change<F>(&mut self, hospital_id: HospitalId, listener: F)
    where
        F: Fn(&Arc<FacilityEntity>) + Send + Sync + 'static,
    {
        let listener = self.cache.on_change(hospital_id, listener);
        self.listeners.push(listener);
    }

    /// Keep `hospital_id` fresh while mounted.
    pub fn watch(&mut self, hospital_id: HospitalId) {
        let guard = self.freshness.watch(hospital_id);
        self.watches.push(guard);
    }

    /// Release the subscriptions, listeners and watch held for one hospital.
    pub fn release(&mut self, hospital_id: &HospitalId) {
        self.subscriptions
            .retain(|sub| sub.hospital_id() != hospital_id);
        self.listeners
            .retain(|listener| listener.hospital_id() != hospital_id);
        self.watches
            .retain(|guard| guard.hospital_id() != hospital_id);
    }

    #[must_use]
    pub fn get(&self, hospital_id: &HospitalId) -> Option<Arc<FacilityEntity>> {
        self.cache.get(hospital_id)
    }

    /// Force a refetch (e.g. a pull-to-refresh gesture).
    ///
    /// # Errors
    ///
    /// See [`FreshnessCoordinator::refresh_now`].
    pub async fn refresh(
        &self,
        hospital_id: &HospitalId,
    ) -> Result<Arc<FacilityEntity>, RefreshError> {
        self.freshness.refresh_now(hospital_id).await
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl<S> Drop for ViewScope<S> {
    fn drop(&mut self) {
        tracing::debug!(
            view = %self.name,
            subscriptions = self.subscriptions.len(),
            watches = self.watches.len(),
            "view unmounted"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use tokio::sync::watch;

    use medsync_domain::connection::ConnectionState;
    use medsync_domain::error::{MedSyncError, NotFoundError};

    use super::*;
    use crate::ports::{DirectoryPage, DirectoryQuery, Fetched};

    struct EmptySource;

    impl FacilitySource for EmptySource {
        fn fetch_one(
            &self,
            hospital_id: &HospitalId,
        ) -> impl Future<Output = Result<Fetched, MedSyncError>> + Send {
            let id = hospital_id.to_string();
            async move {
                Err(NotFoundError {
                    entity: "Facility",
                    id,
                }
                .into())
            }
        }

        fn fetch_directory(
            &self,
            _query: &DirectoryQuery,
        ) -> impl Future<Output = Result<DirectoryPage, MedSyncError>> + Send {
            async { Ok(DirectoryPage::default()) }
        }
    }

    fn scope() -> (ViewScope<EmptySource>, SubscriptionRegistry, FreshnessCoordinator<EmptySource>) {
        let cache = CacheStore::default();
        let registry = SubscriptionRegistry::new();
        let (_, state) = watch::channel(ConnectionState::Connected);
        let freshness = FreshnessCoordinator::new(EmptySource, cache.clone(), state, Default::default());
        let view = ViewScope::new("detail".into(), cache, registry.clone(), freshness.clone());
        (view, registry, freshness)
    }

    fn h(id: &str) -> HospitalId {
        HospitalId::new(id).unwrap()
    }

    #[tokio::test]
    async fn should_release_everything_on_drop() {
        let (mut view, registry, freshness) = scope();
        view.subscribe(Topic::BedStatus, h("H1"), |_| {});
        view.subscribe(Topic::EmergencyAlert, h("H1"), |_| {});
        view.watch(h("H1"));
        assert_eq!(view.subscription_count(), 2);
        assert!(registry.is_watched(&h("H1")));

        drop(view);

        assert!(!registry.is_watched(&h("H1")));
        assert_eq!(freshness.watcher_count(&h("H1")), 0);
    }

    #[tokio::test]
    async fn should_release_one_hospital_only() {
        let (mut view, registry, freshness) = scope();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        view.subscribe(Topic::BedStatus, h("H1"), |_| {});
        view.subscribe(Topic::BedStatus, h("H2"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        view.watch(h("H1"));
        view.watch(h("H2"));

        view.release(&h("H1"));

        assert!(!registry.is_watched(&h("H1")));
        assert_eq!(freshness.watcher_count(&h("H1")), 0);
        assert_eq!(freshness.watcher_count(&h("H2")), 1);
        for cb in registry.callbacks_for(Topic::BedStatus, &h("H2")) {
            cb(&json!({}));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn should_surface_fetch_error_on_refresh() {
        let (view, _, freshness) = scope();
        let result = view.refresh(&h("H404")).await;
        assert!(matches!(result, Err(RefreshError::Fetch(_))));
        assert!(freshness.is_stale(&h("H404")));
        assert!(view.get(&h("H404")).is_none());
    }
}
