//! In-memory port fakes shared by the handler tests.

use std::future::Future;

use serde_json::{Value, json};

use medsync_app::ports::{
    DirectoryPage, DirectoryQuery, FacilitySource, Fetched, Pagination, PushStream, PushTransport,
    TransportError,
};
use medsync_app::session::{SessionConfig, SyncSession};
use medsync_domain::connection::AuthToken;
use medsync_domain::error::{MedSyncError, NotFoundError};
use medsync_domain::id::HospitalId;
use medsync_domain::time::Version;

use crate::state::AppState;

/// A push channel that never opens.
pub(crate) struct OfflineTransport;

impl PushTransport for OfflineTransport {
    fn open(
        &self,
        _token: &AuthToken,
    ) -> impl Future<Output = Result<PushStream, TransportError>> + Send {
        async { Err(TransportError::Connect("offline".into())) }
    }
}

/// Knows exactly one hospital, `H1`.
pub(crate) struct StaticSource;

fn h1_record() -> Fetched {
    let Value::Object(payload) = json!({
        "name": "St. Mary",
        "specialties": ["Cardiology"],
        "realTimeData": {"totalBeds": 40, "availableBeds": 12}
    }) else {
        unreachable!()
    };
    Fetched {
        hospital_id: h1(),
        payload,
        version: Version::from_millis(100),
    }
}

impl FacilitySource for StaticSource {
    fn fetch_one(
        &self,
        hospital_id: &HospitalId,
    ) -> impl Future<Output = Result<Fetched, MedSyncError>> + Send {
        let result = if *hospital_id == h1() {
            Ok(h1_record())
        } else {
            Err(NotFoundError {
                entity: "Facility",
                id: hospital_id.to_string(),
            }
            .into())
        };
        async move { result }
    }

    fn fetch_directory(
        &self,
        _query: &DirectoryQuery,
    ) -> impl Future<Output = Result<DirectoryPage, MedSyncError>> + Send {
        async {
            Ok(DirectoryPage {
                entries: vec![h1_record()],
                pagination: Some(Pagination {
                    page: 1,
                    limit: 10,
                    total: 1,
                    pages: 1,
                }),
            })
        }
    }
}

pub(crate) fn h1() -> HospitalId {
    HospitalId::new("H1").unwrap()
}

pub(crate) fn test_state() -> AppState<OfflineTransport, StaticSource> {
    AppState::new(SyncSession::new(
        OfflineTransport,
        StaticSource,
        SessionConfig::default(),
    ))
}
