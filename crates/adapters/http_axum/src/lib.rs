//! # medsync-adapter-http-axum
//!
//! HTTP adapter built on [axum](https://docs.rs/axum).
//!
//! ## Responsibilities
//! - Serve a **read API** over the session cache for view processes
//!   (`/api/facilities`, `/api/facilities/{id}`, `/api/connection`)
//! - Expose manual refresh (`POST /api/facilities/{id}/refresh`)
//! - Stream cache changes and per-facility push payloads as **SSE**
//!   (`/api/events/stream`, `/api/facilities/{id}/stream`)
//! - Map engine errors into HTTP responses
//!
//! Every per-facility stream mounts its own view scope, so a client that
//! disconnects releases its subscriptions and refresh watch.
//!
//! ## Dependency rule
//! Depends on `medsync-app` (session and port traits) and `medsync-domain`
//! (types used in response mapping). Never leaks axum types into the engine.

pub mod api;
pub mod error;
pub mod router;
pub mod state;

#[cfg(test)]
mod testing;
