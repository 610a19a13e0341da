//! # medsync-domain
//!
//! Pure domain model for the medsync facility synchronization layer.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps and versions
//! - Define **Facilities** (hospital operational state: beds, occupancy, departments, …)
//! - Define **Topics** (routing keys of push updates) and **Envelopes** (one push message)
//! - Define the **Connection state** cycle of the shared push channel
//! - Contain the **Entity Merger**: the single place deciding whether an update
//!   is fresh and valid, and how it folds into the canonical entity
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod connection;
pub mod envelope;
pub mod facility;
pub mod merge;
pub mod topic;
