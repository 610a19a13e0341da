//! Message dispatcher — routes push frames into the cache and out to views.

use serde_json::Value;

use medsync_domain::envelope::{EnvelopeError, UpdateEnvelope};

use crate::cache::{ApplyOutcome, CacheStore, UpdateSource};
use crate::registry::SubscriptionRegistry;

/// What happened to one inbound frame.
#[derive(Debug)]
pub enum DispatchReport {
    /// The payload was handed to this many callbacks.
    Delivered { callbacks: usize },
    /// The cached entity is newer; nothing was folded or delivered.
    Stale,
    /// The frame could not be decoded and was dropped.
    Dropped(EnvelopeError),
}

/// Folds entity updates into the cache, then fans the payload out.
#[derive(Clone)]
pub struct MessageDispatcher {
    cache: CacheStore,
    registry: SubscriptionRegistry,
}

impl MessageDispatcher {
    #[must_use]
    pub fn new(cache: CacheStore, registry: SubscriptionRegistry) -> Self {
        Self { cache, registry }
    }

    /// Decode and dispatch one raw text frame. Malformed frames are logged
    /// and dropped, never raised.
    pub fn dispatch_raw(&self, text: &str) -> DispatchReport {
        match UpdateEnvelope::parse(text) {
            Ok(envelope) => self.dispatch(envelope),
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed push frame");
                DispatchReport::Dropped(err)
            }
        }
    }

    /// Dispatch a decoded envelope.
    ///
    /// Entity topics are folded into the cache first, so a callback reading
    /// the cache already sees the new snapshot. Each registered callback is
    /// invoked at most once.
    pub fn dispatch(&self, envelope: UpdateEnvelope) -> DispatchReport {
        let UpdateEnvelope {
            topic,
            hospital_id,
            payload,
            version,
        } = envelope;

        if topic.folds_into_entity() {
            match self
                .cache
                .apply(&hospital_id, &payload, version, UpdateSource::Push)
            {
                ApplyOutcome::Applied(_) => {}
                ApplyOutcome::Stale { .. } => return DispatchReport::Stale,
                ApplyOutcome::NotCached => {
                    tracing::debug!(%topic, hospital_id = %hospital_id, "update for uncached facility, fan-out only");
                }
                ApplyOutcome::Deferred => {
                    tracing::debug!(%topic, hospital_id = %hospital_id, "update held until first fetch lands");
                }
            }
        }

        let callbacks = self.registry.callbacks_for(topic, &hospital_id);
        let payload = Value::Object(payload);
        for callback in &callbacks {
            callback(&payload);
        }
        tracing::trace!(%topic, hospital_id = %hospital_id, callbacks = callbacks.len(), "dispatched update");

        DispatchReport::Delivered {
            callbacks: callbacks.len(),
        }
    }
}
