//! # medsync-adapter-push-ws
//!
//! WebSocket push adapter — implements the `PushTransport` port over
//! `tokio-tungstenite`.
//!
//! ## Responsibilities
//! - Open the upgrade request with an `Authorization: Bearer` header
//! - Map an HTTP 401/403 upgrade answer to a terminal auth rejection
//! - Forward every inbound text frame, unparsed, to the engine
//! - Watch read silence: report degraded and ping, then give up
//!
//! Reconnection is not handled here; the engine's `ConnectionSupervisor`
//! reopens the channel when the stream ends.
//!
//! ## Dependency rule
//! Depends on `medsync-app` (port traits) and `medsync-domain` only.

mod config;
mod error;
mod transport;

pub use config::PushConfig;
pub use error::PushError;
pub use transport::WsPushTransport;
