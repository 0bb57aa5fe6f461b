use std::time::Duration;

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] sockprims_transport::TransportError),

    /// Frame configuration error.
    #[error("frame error: {0}")]
    Frame(#[from] sockprims_frame::FrameError),

    /// The server or client has not been started.
    #[error("{0} is not started")]
    NotStarted(String),

    /// No live connection is registered under this identity.
    #[error("peer {0} missing")]
    UnknownPeer(String),

    /// The client has no live connection.
    #[error("{0} is not connected")]
    NotConnected(String),

    /// Every send attempt failed.
    #[error("send to {peer} failed after {attempts} attempt(s)")]
    SendFailed { peer: String, attempts: usize },

    /// Request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Peer disconnected while a request was pending.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// A request with the same transaction id is already pending for this peer.
    #[error("transaction {tx} already pending for {peer}")]
    DuplicateTransaction { peer: String, tx: String },

    /// A request payload the codec cannot correlate.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A failover client was used without any endpoints.
    #[error("no client endpoints configured")]
    NoClients,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error outside the transport (e.g. reading a config file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PeerError {
    /// Errors caused by the request itself rather than the endpoint serving it;
    /// every endpoint would reject it the same way.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            PeerError::InvalidRequest(_) | PeerError::DuplicateTransaction { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
