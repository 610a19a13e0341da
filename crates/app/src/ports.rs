//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the sync engine and the outside world.
//! They are defined here (in `app`) so that both the engine and the adapter
//! layer can depend on them without creating circular dependencies.

pub mod facility_source;
pub mod push_transport;

pub use facility_source::{DirectoryPage, DirectoryQuery, FacilitySource, Fetched, Pagination};
pub use push_transport::{PushStream, PushTransport, TransportError, TransportEvent};
