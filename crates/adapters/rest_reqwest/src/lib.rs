//! # medsync-adapter-rest
//!
//! Hospitals REST adapter — implements the `FacilitySource` port over the
//! portal's JSON API with `reqwest`.
//!
//! ## Endpoints
//!
//! | Operation | Request | Response |
//! |-----------|---------|----------|
//! | `fetch_one` | `GET {base}/hospitals/{id}` | facility object, optionally wrapped in `{ "data": … }` |
//! | `fetch_directory` | `GET {base}/hospitals?filters…&page&limit` | `{ "hospitals": [...], "pagination": {...} }` |
//!
//! The merge version of every record is its server timestamp: the record's
//! `lastUpdated`/`updatedAt`, else the response `Date` header, else local time.
//!
//! ## Dependency rule
//! Depends on `medsync-app` (port traits) and `medsync-domain` only.

mod config;
mod error;
mod source;
mod version;

pub use config::RestConfig;
pub use error::RestError;
pub use source::RestFacilitySource;
