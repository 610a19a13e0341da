//! Push adapter error types.

use medsync_app::ports::TransportError;
use medsync_domain::error::MedSyncError;
use tokio_tungstenite::tungstenite;

/// Errors specific to the WebSocket push adapter.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The configured URL or token could not form an upgrade request.
    #[error("invalid push channel request")]
    InvalidRequest(#[source] tungstenite::Error),

    /// The bearer token is not a valid header value.
    #[error("auth token is not a valid header value")]
    InvalidToken,

    /// The server answered the upgrade with 401 or 403.
    #[error("push channel rejected credentials (HTTP {0})")]
    Rejected(u16),

    /// The upgrade handshake did not finish in time.
    #[error("push channel handshake timed out")]
    Timeout,

    /// Socket-level failure during connect.
    #[error("push channel connect failed")]
    Connect(#[source] tungstenite::Error),
}

impl PushError {
    /// Convert into a [`TransportError`] for the connection supervisor.
    ///
    /// Only a credential rejection is terminal.
    #[must_use]
    pub fn into_transport(self) -> TransportError {
        match self {
            Self::Rejected(_) => TransportError::Unauthorized,
            other => TransportError::Connect(Box::new(other)),
        }
    }

    /// Convert into a [`MedSyncError::Upstream`] for propagation across
    /// port boundaries.
    #[must_use]
    pub fn into_domain(self) -> MedSyncError {
        MedSyncError::Upstream(Box::new(self))
    }
}

impl From<PushError> for TransportError {
    fn from(err: PushError) -> Self {
        err.into_transport()
    }
}

impl From<PushError> for MedSyncError {
    fn from(err: PushError) -> Self {
        err.into_domain()
    }
}
