//! Facility source port — the request/response side of the hospitals API.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value};

use medsync_domain::error::MedSyncError;
use medsync_domain::id::HospitalId;
use medsync_domain::time::Version;

/// One facility record as returned by the server, not yet merged.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub hospital_id: HospitalId,
    pub payload: Map<String, Value>,
    /// Server timestamp of the record, used as the merge version.
    pub version: Version,
}

/// Filters and paging of a directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DirectoryQuery {
    pub filters: BTreeMap<String, String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl DirectoryQuery {
    #[must_use]
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Query-string pairs, filters first, in a stable order.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .filters
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(page) = self.page {
            pairs.push(("page".to_string(), page.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u32,
    pub pages: u32,
}

/// One page of the directory listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryPage {
    pub entries: Vec<Fetched>,
    pub pagination: Option<Pagination>,
}

/// Fetches facility records from the server.
pub trait FacilitySource: Send + Sync + 'static {
    /// Fetch one facility by id.
    ///
    /// Returns [`MedSyncError::NotFound`] when the server does not know the id.
    fn fetch_one(
        &self,
        hospital_id: &HospitalId,
    ) -> impl Future<Output = Result<Fetched, MedSyncError>> + Send;

    /// Fetch one page of the facility directory.
    fn fetch_directory(
        &self,
        query: &DirectoryQuery,
    ) -> impl Future<Output = Result<DirectoryPage, MedSyncError>> + Send;
}

impl<S: FacilitySource> FacilitySource for Arc<S> {
    fn fetch_one(
        &self,
        hospital_id: &HospitalId,
    ) -> impl Future<Output = Result<Fetched, MedSyncError>> + Send {
        (**self).fetch_one(hospital_id)
    }

    fn fetch_directory(
        &self,
        query: &DirectoryQuery,
    ) -> impl Future<Output = Result<DirectoryPage, MedSyncError>> + Send {
        (**self).fetch_directory(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_encode_query_pairs_in_stable_order() {
        let query = DirectoryQuery::default()
            .filter("specialty", "Cardiology")
            .filter("city", "Lyon")
            .page(2)
            .limit(20);

        assert_eq!(
            query.to_pairs(),
            vec![
                ("city".to_string(), "Lyon".to_string()),
                ("specialty".to_string(), "Cardiology".to_string()),
                ("page".to_string(), "2".to_string()),
                ("limit".to_string(), "20".to_string()),
            ]
        );
    }

    #[test]
    fn should_treat_equal_filters_as_same_query() {
        let a = DirectoryQuery::default().filter("a", "1").filter("b", "2");
        let b = DirectoryQuery::default().filter("b", "2").filter("a", "1");
        assert_eq!(a, b);
    }
}
