//! `reqwest` implementation of [`FacilitySource`].

use std::future::Future;

use reqwest::header::DATE;
use serde::Deserialize;
use serde_json::{Map, Value};

use medsync_app::ports::{DirectoryPage, DirectoryQuery, FacilitySource, Fetched, Pagination};
use medsync_domain::connection::AuthToken;
use medsync_domain::error::MedSyncError;
use medsync_domain::id::HospitalId;

use crate::config::RestConfig;
use crate::error::RestError;
use crate::version::record_version;

const ID_KEYS: [&str; 3] = ["hospitalId", "_id", "id"];

/// Fetches facilities from the hospitals REST API.
#[derive(Debug, Clone)]
pub struct RestFacilitySource {
    client: reqwest::Client,
    config: RestConfig,
    token: Option<AuthToken>,
}

/// A decoded response body with its `Date` header.
struct Reply {
    body: Value,
    date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WirePagination {
    page: u32,
    limit: u32,
    total: u32,
    pages: u32,
}

impl From<WirePagination> for Pagination {
    fn from(wire: WirePagination) -> Self {
        Self {
            page: wire.page,
            limit: wire.limit,
            total: wire.total,
            pages: wire.pages,
        }
    }
}

impl RestFacilitySource {
    /// Build a source; `token` is sent as `Authorization: Bearer` when set.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::Client`] if the HTTP client cannot be built.
    pub fn new(config: RestConfig, token: Option<AuthToken>) -> Result<Self, RestError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(RestError::Client)?;
        Ok(Self {
            client,
            config,
            token,
        })
    }

    /// Replace the session token (e.g. after a re-login).
    #[must_use]
    pub fn with_token(mut self, token: AuthToken) -> Self {
        self.token = Some(token);
        self
    }

    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Reply, RestError> {
        let url = self.config.url(path);
        tracing::debug!(%url, "GET");
        let mut request = self.client.get(&url).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose());
        }

        let response = request.send().await.map_err(RestError::Request)?;
        let status = response.status();
        let date = response
            .headers()
            .get(DATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let text = response.text().await.map_err(RestError::Request)?;

        if !status.is_success() {
            return Err(RestError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        let body = serde_json::from_str(&text).map_err(RestError::Decode)?;
        Ok(Reply { body, date })
    }

    async fn load_one(&self, hospital_id: &HospitalId) -> Result<Fetched, RestError> {
        let path = format!("hospitals/{hospital_id}");
        let reply = self.get(&path, &[]).await.map_err(|err| match err {
            RestError::Status { status: 404, .. } => RestError::NotFound(hospital_id.to_string()),
            other => other,
        })?;

        let Value::Object(payload) = unwrap_data(reply.body) else {
            return Err(RestError::Malformed("facility is not an object"));
        };
        let version = record_version(&payload, reply.date.as_deref());
        Ok(Fetched {
            hospital_id: hospital_id.clone(),
            payload,
            version,
        })
    }

    async fn load_directory(&self, query: &DirectoryQuery) -> Result<DirectoryPage, RestError> {
        let reply = self.get("hospitals", &query.to_pairs()).await?;

        let (records, pagination) = match unwrap_data(reply.body) {
            Value::Array(records) => (records, None),
            Value::Object(mut body) => {
                let Some(Value::Array(records)) = body.remove("hospitals") else {
                    return Err(RestError::Malformed("missing hospitals array"));
                };
                let pagination = match body.remove("pagination") {
                    Some(raw) => Some(
                        serde_json::from_value::<WirePagination>(raw)
                            .map_err(RestError::Decode)?
                            .into(),
                    ),
                    None => None,
                };
                (records, pagination)
            }
            _ => return Err(RestError::Malformed("directory is not an object")),
        };

        let entries = records
            .into_iter()
            .filter_map(|record| directory_entry(record, reply.date.as_deref()))
            .collect();
        Ok(DirectoryPage {
            entries,
            pagination,
        })
    }
}

impl FacilitySource for RestFacilitySource {
    fn fetch_one(
        &self,
        hospital_id: &HospitalId,
    ) -> impl Future<Output = Result<Fetched, MedSyncError>> + Send {
        let hospital_id = hospital_id.clone();
        async move {
            self.load_one(&hospital_id).await.map_err(|err| {
                tracing::warn!(error = %err, hospital_id = %hospital_id, "facility fetch failed");
                err.into_domain()
            })
        }
    }

    fn fetch_directory(
        &self,
        query: &DirectoryQuery,
    ) -> impl Future<Output = Result<DirectoryPage, MedSyncError>> + Send {
        let query = query.clone();
        async move {
            self.load_directory(&query).await.map_err(|err| {
                tracing::warn!(error = %err, "directory fetch failed");
                err.into_domain()
            })
        }
    }
}

/// Accept both a bare body and a `{ "data": … }` envelope.
fn unwrap_data(body: Value) -> Value {
    match body {
        Value::Object(mut map)
            if map
                .get("data")
                .is_some_and(|d| d.is_object() || d.is_array()) =>
        {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn directory_entry(record: Value, date: Option<&str>) -> Option<Fetched> {
    let Value::Object(payload) = record else {
        tracing::warn!("skipping non-object directory entry");
        return None;
    };
    let Some(hospital_id) = record_id(&payload) else {
        tracing::warn!("skipping directory entry without a usable id");
        return None;
    };
    let version = record_version(&payload, date);
    Some(Fetched {
        hospital_id,
        payload,
        version,
    })
}

fn record_id(payload: &Map<String, Value>) -> Option<HospitalId> {
    ID_KEYS
        .iter()
        .filter_map(|key| payload.get(*key).and_then(Value::as_str))
        .find_map(|raw| HospitalId::new(raw).ok())
}
