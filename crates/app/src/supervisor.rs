//! Connection supervisor — owns the single push channel of a session.
//!
//! One background task per session opens the channel, feeds every frame to
//! the [`MessageDispatcher`], and reconnects with capped, jittered
//! exponential backoff when the channel drops. Only an auth rejection stops
//! the loop; it surfaces as a [`FatalEvent`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use medsync_domain::connection::{AuthToken, ConnectionState};

use crate::dispatcher::MessageDispatcher;
use crate::lock;
use crate::ports::{PushTransport, TransportError, TransportEvent};

/// Backoff schedule for reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Relative jitter, `0.0..=1.0`; `0.2` means ±20%.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (zero-based), with `sample` in
    /// `-1.0..=1.0` picking the jitter offset. Never exceeds `max`.
    #[must_use]
    pub fn delay(&self, attempt: u32, sample: f64) -> Duration {
        let backoff = self
            .base
            .saturating_mul(2_u32.saturating_pow(attempt))
            .min(self.max);
        let factor = 1.0 + self.jitter.clamp(0.0, 1.0) * sample.clamp(-1.0, 1.0);
        if !factor.is_finite() {
            return backoff;
        }
        backoff.mul_f64(factor).min(self.max)
    }

    /// Delay before retry number `attempt` with a random jitter sample.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.delay(attempt, rand::random::<f64>().mul_add(2.0, -1.0))
    }
}

/// Events that require the user to re-authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalEvent {
    AuthRejected,
}

struct Inner<T> {
    transport: T,
    dispatcher: MessageDispatcher,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    fatal: broadcast::Sender<FatalEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T> Inner<T> {
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            tracing::debug!(from = %state, to = %next, "push channel state changed");
            *state = next;
            true
        });
    }
}

pub struct ConnectionSupervisor<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ConnectionSupervisor<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> ConnectionSupervisor<T> {
    /// Tear the channel down and cancel any pending retry.
    pub fn disconnect(&self) {
        if let Some(task) = lock(&self.inner.task).take() {
            task.abort();
            tracing::info!("push channel disconnected");
        }
        self.inner.set_state(ConnectionState::Disconnected);
    }
}

impl<T: PushTransport> ConnectionSupervisor<T> {
    #[must_use]
    pub fn new(transport: T, dispatcher: MessageDispatcher, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (fatal, _) = broadcast::channel(4);
        Self {
            inner: Arc::new(Inner {
                transport,
                dispatcher,
                policy,
                state,
                fatal,
                task: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    /// Observe state transitions without polling.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn fatal_events(&self) -> broadcast::Receiver<FatalEvent> {
        self.inner.fatal.subscribe()
    }

    /// Whether the supervision loop is alive (connected or retrying).
    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.inner.task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Start supervising the push channel with `token`.
    ///
    /// A no-op while the loop is already alive. Returns whether a new loop
    /// was started.
    pub fn connect(&self, token: AuthToken) -> bool {
        let mut task = lock(&self.inner.task);
        if task.as_ref().is_some_and(|task| !task.is_finished()) {
            tracing::debug!("push channel already supervised");
            return false;
        }
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(supervise(inner, token)));
        true
    }
}

async fn supervise<T: PushTransport>(inner: Arc<Inner<T>>, token: AuthToken) {
    let mut attempt: u32 = 0;
    loop {
        inner.set_state(ConnectionState::Connecting);
        match inner.transport.open(&token).await {
            Ok(mut stream) => {
                attempt = 0;
                inner.set_state(ConnectionState::Connected);
                tracing::info!("push channel connected");
                while let Some(event) = stream.recv().await {
                    match event {
                        TransportEvent::Frame(text) => {
                            inner.set_state(ConnectionState::Connected);
                            inner.dispatcher.dispatch_raw(&text);
                        }
                        TransportEvent::Degraded(reason) => {
                            tracing::warn!(%reason, "push channel degraded");
                            inner.set_state(ConnectionState::Degraded(reason));
                        }
                    }
                }
                tracing::warn!("push channel dropped");
            }
            Err(TransportError::Unauthorized) => {
                tracing::error!("push channel rejected credentials, re-authentication required");
                inner.set_state(ConnectionState::Disconnected);
                let _ = inner.fatal.send(FatalEvent::AuthRejected);
                return;
            }
            Err(err) => {
                tracing::warn!(error = %err, attempt, "push channel connect failed");
            }
        }
        inner.set_state(ConnectionState::Disconnected);

        let delay = inner.policy.next_delay(attempt);
        attempt = attempt.saturating_add(1);
        tracing::info!(?delay, attempt, "reconnecting push channel");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::{Value, json};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    use medsync_domain::id::HospitalId;
    use medsync_domain::time::Version;
    use medsync_domain::topic::Topic;

    use super::*;
    use crate::cache::{CacheStore, UpdateSource};
    use crate::ports::PushStream;
    use crate::registry::SubscriptionRegistry;

    enum Step {
        Open(mpsc::Receiver<TransportEvent>),
        Fail,
        Reject,
    }

    /// Plays back one scripted step per `open` call; fails once exhausted.
    #[derive(Default)]
    struct ScriptedTransport {
        steps: Mutex<VecDeque<Step>>,
        opens: AtomicUsize,
    }

    impl ScriptedTransport {
        fn channel(&self) -> mpsc::Sender<TransportEvent> {
            let (tx, rx) = mpsc::channel(16);
            self.steps.lock().unwrap().push_back(Step::Open(rx));
            tx
        }

        fn fail(&self) {
            self.steps.lock().unwrap().push_back(Step::Fail);
        }

        fn reject(&self) {
            self.steps.lock().unwrap().push_back(Step::Reject);
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    impl PushTransport for ScriptedTransport {
        fn open(
            &self,
            _token: &AuthToken,
        ) -> impl Future<Output = Result<PushStream, TransportError>> + Send {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let result = match self.steps.lock().unwrap().pop_front() {
                Some(Step::Open(rx)) => Ok(rx),
                Some(Step::Reject) => Err(TransportError::Unauthorized),
                Some(Step::Fail) | None => Err(TransportError::Connect("refused".into())),
            };
            async move { result }
        }
    }

    struct Harness {
        transport: Arc<ScriptedTransport>,
        cache: CacheStore,
        registry: SubscriptionRegistry,
        supervisor: ConnectionSupervisor<Arc<ScriptedTransport>>,
    }

    fn harness() -> Harness {
        let transport = Arc::new(ScriptedTransport::default());
        let cache = CacheStore::default();
        let registry = SubscriptionRegistry::new();
        let dispatcher = MessageDispatcher::new(cache.clone(), registry.clone());
        let supervisor =
            ConnectionSupervisor::new(Arc::clone(&transport), dispatcher, ReconnectPolicy::default());
        Harness {
            transport,
            cache,
            registry,
            supervisor,
        }
    }

    fn h1() -> HospitalId {
        HospitalId::new("H1").unwrap()
    }

    fn token() -> AuthToken {
        AuthToken::new("jwt")
    }

    fn bed_frame(available: u32, timestamp: i64) -> TransportEvent {
        TransportEvent::Frame(
            json!({
                "topic": "hospital:bed-status",
                "hospitalId": "H1",
                "payload": {"availableBeds": available},
                "timestamp": timestamp,
            })
            .to_string(),
        )
    }

    fn assert_close(actual: Duration, expected: Duration) {
        let diff = actual.abs_diff(expected);
        assert!(diff < Duration::from_millis(1), "{actual:?} != {expected:?}");
    }

    #[test]
    fn should_double_delay_until_cap() {
        let policy = ReconnectPolicy::default();
        assert_close(policy.delay(0, 0.0), Duration::from_secs(1));
        assert_close(policy.delay(1, 0.0), Duration::from_secs(2));
        assert_close(policy.delay(4, 0.0), Duration::from_secs(16));
        assert_close(policy.delay(5, 0.0), Duration::from_secs(30));
        assert_close(policy.delay(40, 0.0), Duration::from_secs(30));
    }

    #[test]
    fn should_apply_jitter_within_bounds() {
        let policy = ReconnectPolicy::default();
        assert_close(policy.delay(0, 1.0), Duration::from_millis(1200));
        assert_close(policy.delay(0, -1.0), Duration::from_millis(800));
        assert_close(policy.delay(10, 1.0), Duration::from_secs(30));

        for _ in 0..200 {
            let delay = policy.next_delay(2);
            assert!(delay >= Duration::from_millis(3199), "{delay:?}");
            assert!(delay <= Duration::from_millis(4801), "{delay:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn should_connect_and_dispatch_frames() {
        let h = harness();
        let tx = h.transport.channel();
        let Value::Object(seed) = json!({"name": "St. Mary", "totalBeds": 40, "availableBeds": 12}) else {
            unreachable!()
        };
        h.cache.apply(&h1(), &seed, Version::from_millis(1), UpdateSource::Fetch);
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let _sub = h.registry.subscribe(Topic::BedStatus, h1(), move |payload| {
            let _ = seen_tx.send(payload.clone());
        });

        let mut state = h.supervisor.subscribe_state();
        assert!(h.supervisor.connect(token()));
        state.wait_for(ConnectionState::is_connected).await.unwrap();

        tx.send(bed_frame(9, 100)).await.unwrap();
        let payload = seen_rx.recv().await.unwrap();

        assert_eq!(payload["availableBeds"], 9);
        assert_eq!(h.cache.get(&h1()).unwrap().real_time_data.available_beds, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn should_ignore_connect_while_loop_is_alive() {
        let h = harness();
        let _tx = h.transport.channel();
        let mut state = h.supervisor.subscribe_state();

        assert!(h.supervisor.connect(token()));
        state.wait_for(ConnectionState::is_connected).await.unwrap();
        assert!(!h.supervisor.connect(token()));

        assert_eq!(h.transport.opens(), 1);
        assert!(h.supervisor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn should_reconnect_with_backoff_and_keep_subscriptions() {
        let h = harness();
        let first = h.transport.channel();
        h.transport.fail();
        let second = h.transport.channel();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let _sub = h.registry.subscribe(Topic::BedStatus, h1(), move |payload| {
            let _ = seen_tx.send(payload.clone());
        });

        let mut state = h.supervisor.subscribe_state();
        h.supervisor.connect(token());
        state.wait_for(ConnectionState::is_connected).await.unwrap();

        let dropped_at = Instant::now();
        drop(first);
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        state.wait_for(ConnectionState::is_connected).await.unwrap();

        // 1s then 2s of backoff, each ±20%.
        let waited = dropped_at.elapsed();
        assert!(waited >= Duration::from_millis(2400), "{waited:?}");
        assert!(waited <= Duration::from_millis(3600), "{waited:?}");
        assert_eq!(h.transport.opens(), 3);

        second.send(bed_frame(5, 10)).await.unwrap();
        assert_eq!(seen_rx.recv().await.unwrap()["availableBeds"], 5);
    }

    #[tokio::test(start_paused = true)]
    async fn should_stop_and_report_fatal_event_on_auth_rejection() {
        let h = harness();
        h.transport.reject();
        let mut fatal = h.supervisor.fatal_events();

        h.supervisor.connect(token());
        assert_eq!(fatal.recv().await.unwrap(), FatalEvent::AuthRejected);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.transport.opens(), 1);
        assert_eq!(h.supervisor.state(), ConnectionState::Disconnected);
        assert!(!h.supervisor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn should_restore_connected_on_frame_after_degraded() {
        let h = harness();
        let tx = h.transport.channel();
        let mut state = h.supervisor.subscribe_state();
        h.supervisor.connect(token());
        state.wait_for(ConnectionState::is_connected).await.unwrap();

        tx.send(TransportEvent::Degraded("no heartbeat".into()))
            .await
            .unwrap();
        state
            .wait_for(|s| matches!(s, ConnectionState::Degraded(_)))
            .await
            .unwrap();

        tx.send(bed_frame(1, 1)).await.unwrap();
        state.wait_for(ConnectionState::is_connected).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn should_cancel_pending_retry_on_disconnect() {
        let h = harness();
        h.supervisor.connect(token());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.transport.opens(), 1);

        h.supervisor.disconnect();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(h.transport.opens(), 1);
        assert_eq!(h.supervisor.state(), ConnectionState::Disconnected);
        assert!(!h.supervisor.is_running());
    }
}
