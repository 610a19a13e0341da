//! JSON handlers for cached facilities.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use medsync_app::ports::{DirectoryQuery, FacilitySource, Pagination, PushTransport};
use medsync_domain::facility::FacilityEntity;
use medsync_domain::id::HospitalId;

use crate::error::ApiError;
use crate::state::AppState;

/// Paging information of a directory listing.
#[derive(Debug, Serialize)]
pub struct PaginationBody {
    pub page: u32,
    pub limit: u32,
    pub total: u32,
    pub pages: u32,
}

impl From<Pagination> for PaginationBody {
    fn from(p: Pagination) -> Self {
        Self {
            page: p.page,
            limit: p.limit,
            total: p.total,
            pages: p.pages,
        }
    }
}

/// Body of the list endpoint.
#[derive(Debug, Serialize)]
pub struct FacilityList {
    pub facilities: Vec<FacilityEntity>,
    pub pagination: Option<PaginationBody>,
}

/// Possible responses from the list endpoint.
pub enum ListResponse {
    Ok(Json<FacilityList>),
}

impl IntoResponse for ListResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Possible responses from the get and refresh endpoints.
pub enum GetResponse {
    Ok(Json<FacilityEntity>),
}

impl IntoResponse for GetResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Split query parameters into a directory query. `page` and `limit` are
/// paging; every other parameter is a filter.
fn directory_query(params: BTreeMap<String, String>) -> DirectoryQuery {
    params
        .into_iter()
        .fold(DirectoryQuery::default(), |query, (key, value)| {
            match key.as_str() {
                "page" => match value.parse() {
                    Ok(page) => query.page(page),
                    Err(_) => query,
                },
                "limit" => match value.parse() {
                    Ok(limit) => query.limit(limit),
                    Err(_) => query,
                },
                _ => query.filter(key, value),
            }
        })
}

/// `GET /api/facilities`
///
/// Without parameters, lists the cached facilities. With filters or paging,
/// refreshes that directory page from the server first.
pub async fn list<T, S>(
    State(state): State<AppState<T, S>>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<ListResponse, ApiError>
where
    T: PushTransport,
    S: FacilitySource,
{
    if params.is_empty() {
        let facilities = state
            .session
            .cache()
            .get_all()
            .iter()
            .map(|entity| FacilityEntity::clone(entity))
            .collect();
        return Ok(ListResponse::Ok(Json(FacilityList {
            facilities,
            pagination: None,
        })));
    }

    let query = directory_query(params);
    let snapshot = state.session.freshness().refresh_directory(&query).await?;
    Ok(ListResponse::Ok(Json(FacilityList {
        facilities: snapshot
            .facilities
            .iter()
            .map(|entity| FacilityEntity::clone(entity))
            .collect(),
        pagination: snapshot.pagination.map(PaginationBody::from),
    })))
}

/// `GET /api/facilities/{id}` — fetches on a cache miss.
pub async fn get<T, S>(
    State(state): State<AppState<T, S>>,
    Path(id): Path<String>,
) -> Result<GetResponse, ApiError>
where
    T: PushTransport,
    S: FacilitySource,
{
    let hospital_id = HospitalId::new(id)?;
    let entity = state.session.get_or_fetch(&hospital_id).await?;
    Ok(GetResponse::Ok(Json(FacilityEntity::clone(&entity))))
}

/// `POST /api/facilities/{id}/refresh` — refetch now, sharing any fetch
/// already in flight.
pub async fn refresh<T, S>(
    State(state): State<AppState<T, S>>,
    Path(id): Path<String>,
) -> Result<GetResponse, ApiError>
where
    T: PushTransport,
    S: FacilitySource,
{
    let hospital_id = HospitalId::new(id)?;
    let entity = state.session.freshness().refresh_now(&hospital_id).await?;
    Ok(GetResponse::Ok(Json(FacilityEntity::clone(&entity))))
}
