//! Topic subscription registry — many independent callbacks per key.
//!
//! Each [`Subscription`] owns exactly one callback registration. Removing it
//! never touches other registrations on the same `(topic, hospital)` key, so
//! two views watching the same hospital cannot tear each other down.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;

use medsync_domain::id::{HospitalId, SubscriptionId};
use medsync_domain::topic::Topic;

use crate::lock;

/// A registered update handler. Receives the raw payload of each envelope.
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

type Key = (Topic, HospitalId);

#[derive(Default)]
struct Inner {
    entries: Mutex<HashMap<Key, Vec<(SubscriptionId, Callback)>>>,
}

/// Session-wide registry. Cloning shares the same registrations.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<Inner>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for updates on `(topic, hospital_id)`.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, topic: Topic, hospital_id: HospitalId, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        lock(&self.inner.entries)
            .entry((topic, hospital_id.clone()))
            .or_default()
            .push((id, Arc::new(callback)));
        tracing::trace!(%topic, hospital_id = %hospital_id, subscription = %id, "subscribed");
        Subscription {
            id,
            topic,
            hospital_id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Snapshot of the callbacks currently registered on a key.
    ///
    /// Invoking them happens outside the registry lock, so a callback may
    /// subscribe or unsubscribe freely.
    #[must_use]
    pub fn callbacks_for(&self, topic: Topic, hospital_id: &HospitalId) -> Vec<Callback> {
        lock(&self.inner.entries)
            .get(&(topic, hospital_id.clone()))
            .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn subscriber_count(&self, topic: Topic, hospital_id: &HospitalId) -> usize {
        lock(&self.inner.entries)
            .get(&(topic, hospital_id.clone()))
            .map_or(0, Vec::len)
    }

    /// Whether any topic has a live subscription for `hospital_id`.
    #[must_use]
    pub fn is_watched(&self, hospital_id: &HospitalId) -> bool {
        lock(&self.inner.entries)
            .keys()
            .any(|(_, id)| id == hospital_id)
    }

    /// Every hospital with at least one live subscription.
    #[must_use]
    pub fn watched_ids(&self) -> HashSet<HospitalId> {
        lock(&self.inner.entries)
            .keys()
            .map(|(_, id)| id.clone())
            .collect()
    }

    fn remove(inner: &Inner, key: &Key, id: SubscriptionId) {
        let mut entries = lock(&inner.entries);
        if let Some(list) = entries.get_mut(key) {
            list.retain(|(sub, _)| *sub != id);
            if list.is_empty() {
                entries.remove(key);
            }
        }
    }
}

/// Handle of one registered callback. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    hospital_id: HospitalId,
    registry: Weak<Inner>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub fn topic(&self) -> Topic {
        self.topic
    }

    #[must_use]
    pub fn hospital_id(&self) -> &HospitalId {
        &self.hospital_id
    }

    /// Remove this registration. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("hospital_id", &self.hospital_id)
            .finish_non_exhaustive()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            let key = (self.topic, self.hospital_id.clone());
            SubscriptionRegistry::remove(&inner, &key, self.id);
            tracing::trace!(topic = %self.topic, hospital_id = %self.hospital_id, subscription = %self.id, "unsubscribed");
        }
    }
}
