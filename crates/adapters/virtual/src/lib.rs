//! # medsync-adapter-virtual
//!
//! Virtual/demo integration that simulates a handful of hospitals for
//! testing and demonstration purposes.
//!
//! ## Provided hospitals
//!
//! | Id | Name | Beds |
//! |----|------|------|
//! | `H1` | St. Mary's General | 12 / 40 |
//! | `H2` | Lakeside Children's Hospital | 35 / 60 |
//! | `H3` | Northside Trauma Center | 3 / 25 |
//!
//! [`VirtualIntegration`] hands out a `PushTransport` that emits random
//! `hospital:bed-status` and `emergency:alert` frames and a `FacilitySource`
//! that serves the same simulated state, so pushes and refetches agree.
//!
//! ## Dependency rule
//!
//! Depends on `medsync-app` (port traits) and `medsync-domain` only.

mod config;
mod hospitals;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::mpsc;

use medsync_app::ports::{
    DirectoryPage, DirectoryQuery, FacilitySource, Fetched, Pagination, PushStream, PushTransport,
    TransportError, TransportEvent,
};
use medsync_domain::connection::AuthToken;
use medsync_domain::error::{MedSyncError, NotFoundError};
use medsync_domain::id::HospitalId;

pub use config::VirtualConfig;
use hospitals::World;

const DEFAULT_PAGE_SIZE: u32 = 10;

fn lock(world: &Mutex<World>) -> MutexGuard<'_, World> {
    world.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Virtual integration owning the simulated hospitals.
#[derive(Debug, Clone)]
pub struct VirtualIntegration {
    world: Arc<Mutex<World>>,
    config: VirtualConfig,
}

impl Default for VirtualIntegration {
    fn default() -> Self {
        Self::new(VirtualConfig::default())
    }
}

impl VirtualIntegration {
    #[must_use]
    pub fn new(config: VirtualConfig) -> Self {
        Self {
            world: Arc::new(Mutex::new(World::default())),
            config,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        "virtual"
    }

    /// Ids of every simulated hospital.
    #[must_use]
    pub fn hospital_ids(&self) -> Vec<HospitalId> {
        lock(&self.world)
            .hospitals()
            .iter()
            .map(|h| h.id.clone())
            .collect()
    }

    #[must_use]
    pub fn transport(&self) -> VirtualPushTransport {
        VirtualPushTransport {
            world: Arc::clone(&self.world),
            config: self.config.clone(),
        }
    }

    #[must_use]
    pub fn source(&self) -> VirtualFacilitySource {
        VirtualFacilitySource {
            world: Arc::clone(&self.world),
        }
    }
}

/// Simulated push channel.
#[derive(Debug, Clone)]
pub struct VirtualPushTransport {
    world: Arc<Mutex<World>>,
    config: VirtualConfig,
}

impl PushTransport for VirtualPushTransport {
    fn open(
        &self,
        token: &AuthToken,
    ) -> impl Future<Output = Result<PushStream, TransportError>> + Send {
        let rejected = token.expose().is_empty();
        let world = Arc::clone(&self.world);
        let config = self.config.clone();
        async move {
            if rejected {
                return Err(TransportError::Unauthorized);
            }
            let (tx, rx) = mpsc::channel(64);
            tokio::spawn(simulate(world, config, tx));
            tracing::info!("virtual push channel open");
            Ok(rx)
        }
    }
}

async fn simulate(world: Arc<Mutex<World>>, config: VirtualConfig, tx: mpsc::Sender<TransportEvent>) {
    let mut rng = config
        .seed
        .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
    let mut ticker = tokio::time::interval(config.tick_interval());
    loop {
        tokio::select! {
            () = tx.closed() => return,
            _ = ticker.tick() => {
                let Some(envelope) = lock(&world).step(&mut rng, config.alert_probability) else {
                    continue;
                };
                tracing::trace!(topic = %envelope.topic, hospital_id = %envelope.hospital_id, "virtual frame");
                let frame = envelope.to_json().to_string();
                if tx.send(TransportEvent::Frame(frame)).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// In-memory hospitals API over the simulated state.
///
/// Directory filters: `specialty` (substring, case-insensitive) and
/// `search` (substring of the name).
#[derive(Debug, Clone)]
pub struct VirtualFacilitySource {
    world: Arc<Mutex<World>>,
}

impl FacilitySource for VirtualFacilitySource {
    fn fetch_one(
        &self,
        hospital_id: &HospitalId,
    ) -> impl Future<Output = Result<Fetched, MedSyncError>> + Send {
        let result = {
            let mut world = lock(&self.world);
            match world.find(hospital_id).map(hospitals::VirtualHospital::record) {
                Some(payload) => Ok(Fetched {
                    hospital_id: hospital_id.clone(),
                    payload,
                    version: world.tick(),
                }),
                None => Err(NotFoundError {
                    entity: "Facility",
                    id: hospital_id.to_string(),
                }
                .into()),
            }
        };
        async move { result }
    }

    fn fetch_directory(
        &self,
        query: &DirectoryQuery,
    ) -> impl Future<Output = Result<DirectoryPage, MedSyncError>> + Send {
        let page = {
            let mut world = lock(&self.world);
            let specialty = query.filters.get("specialty");
            let search = query.filters.get("search").map(|s| s.to_lowercase());
            let matching: Vec<_> = world
                .hospitals()
                .iter()
                .filter(|h| specialty.is_none_or(|s| h.has_specialty(s)))
                .filter(|h| {
                    search
                        .as_deref()
                        .is_none_or(|s| h.name().to_lowercase().contains(s))
                })
                .map(|h| (h.id.clone(), h.record()))
                .collect();

            let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
            let page = query.page.unwrap_or(1).max(1);
            let total = u32::try_from(matching.len()).unwrap_or(u32::MAX);
            let skip = usize::try_from((page - 1).saturating_mul(limit)).unwrap_or(usize::MAX);
            let take = usize::try_from(limit).unwrap_or(usize::MAX);

            let mut entries = Vec::new();
            for (hospital_id, payload) in matching.into_iter().skip(skip).take(take) {
                entries.push(Fetched {
                    hospital_id,
                    payload,
                    version: world.tick(),
                });
            }
            DirectoryPage {
                entries,
                pagination: Some(Pagination {
                    page,
                    limit,
                    total,
                    pages: total.div_ceil(limit),
                }),
            }
        };
        async move { Ok(page) }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use medsync_domain::envelope::UpdateEnvelope;
    use medsync_domain::topic::Topic;

    use super::*;

    fn h(id: &str) -> HospitalId {
        HospitalId::new(id).unwrap()
    }

    fn seeded(alert_probability: f64) -> VirtualIntegration {
        VirtualIntegration::new(VirtualConfig {
            tick_interval_ms: 100,
            alert_probability,
            seed: Some(9),
            ..VirtualConfig::default()
        })
    }

    #[test]
    fn should_return_virtual_as_name() {
        assert_eq!(VirtualIntegration::default().name(), "virtual");
    }

    #[test]
    fn should_list_seeded_hospital_ids() {
        assert_eq!(
            VirtualIntegration::default().hospital_ids(),
            vec![h("H1"), h("H2"), h("H3")]
        );
    }

    #[tokio::test]
    async fn should_fetch_seeded_hospital() {
        let source = VirtualIntegration::default().source();
        let fetched = source.fetch_one(&h("H3")).await.unwrap();
        assert_eq!(fetched.hospital_id, h("H3"));
        assert_eq!(fetched.payload["name"], "Northside Trauma Center");
    }

    #[tokio::test]
    async fn should_return_not_found_for_unknown_hospital() {
        let source = VirtualIntegration::default().source();
        let err = source.fetch_one(&h("H99")).await.unwrap_err();
        assert!(matches!(err, MedSyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn should_filter_directory_by_specialty() {
        let source = VirtualIntegration::default().source();
        let query = DirectoryQuery::default().filter("specialty", "emergency");
        let page = source.fetch_directory(&query).await.unwrap();
        let ids: Vec<_> = page.entries.iter().map(|e| e.hospital_id.clone()).collect();
        assert_eq!(ids, vec![h("H1"), h("H3")]);
        assert_eq!(page.pagination.unwrap().total, 2);
    }

    #[tokio::test]
    async fn should_page_directory() {
        let source = VirtualIntegration::default().source();
        let page = source
            .fetch_directory(&DirectoryQuery::default().page(2).limit(2))
            .await
            .unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].hospital_id, h("H3"));
        assert_eq!(
            page.pagination,
            Some(Pagination {
                page: 2,
                limit: 2,
                total: 3,
                pages: 2
            })
        );
    }

    #[tokio::test]
    async fn should_reject_empty_token() {
        let transport = VirtualIntegration::default().transport();
        let result = transport.open(&AuthToken::new("")).await;
        assert!(matches!(result, Err(TransportError::Unauthorized)));
    }

    #[tokio::test(start_paused = true)]
    async fn should_emit_decodable_frames_in_version_order() {
        let transport = seeded(0.2).transport();
        let mut rx = transport.open(&AuthToken::new("demo")).await.unwrap();

        let mut last = None;
        for _ in 0..5 {
            let Some(TransportEvent::Frame(text)) = rx.recv().await else {
                panic!("expected a frame");
            };
            let envelope = UpdateEnvelope::parse(&text).unwrap();
            assert!(matches!(envelope.topic, Topic::BedStatus | Topic::EmergencyAlert));
            if let Some(previous) = last {
                assert!(envelope.version > previous);
            }
            last = Some(envelope.version);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn should_serve_pushed_state_on_fetch() {
        let integration = seeded(0.0);
        let mut rx = integration
            .transport()
            .open(&AuthToken::new("demo"))
            .await
            .unwrap();

        let Some(TransportEvent::Frame(text)) = rx.recv().await else {
            panic!("expected a frame");
        };
        drop(rx);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let pushed = UpdateEnvelope::parse(&text).unwrap();

        let fetched = integration
            .source()
            .fetch_one(&pushed.hospital_id)
            .await
            .unwrap();
        assert_eq!(
            fetched.payload["realTimeData"]["availableBeds"],
            pushed.payload["availableBeds"]
        );
        assert!(fetched.version > pushed.version);
    }
}
