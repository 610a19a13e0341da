//! Push transport port — the raw bidirectional channel to the update server.
//!
//! A transport only moves text frames. Decoding, routing and reconnection
//! belong to the engine (`MessageDispatcher`, `ConnectionSupervisor`).

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;

use medsync_domain::connection::AuthToken;

/// Something observed on an open push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound text frame.
    Frame(String),
    /// The channel is still open but unhealthy (e.g. heartbeat silence).
    Degraded(String),
}

/// Inbound side of an open channel.
///
/// The transport closes the channel by dropping its sender; the engine
/// closes it by dropping this receiver.
pub type PushStream = mpsc::Receiver<TransportEvent>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Terminal: the server refused the session credentials.
    #[error("push channel rejected the session credentials")]
    Unauthorized,

    /// Transient: anything else that prevented the channel from opening.
    #[error("push channel could not be opened")]
    Connect(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Opens push channels on behalf of the connection supervisor.
pub trait PushTransport: Send + Sync + 'static {
    /// Open a new channel authenticated with `token`.
    fn open(
        &self,
        token: &AuthToken,
    ) -> impl Future<Output = Result<PushStream, TransportError>> + Send;
}

impl<T: PushTransport> PushTransport for Arc<T> {
    fn open(
        &self,
        token: &AuthToken,
    ) -> impl Future<Output = Result<PushStream, TransportError>> + Send {
        (**self).open(token)
    }
}
