//! Transport error types and their machine-readable codes.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("invalid stream endpoint {path:?}: {reason}")]
    InvalidEndpoint { path: String, reason: String },

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("stream failed: {0}")]
    Stream(String),

    #[error("transport task has shut down")]
    Closed,
}

impl TransportError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::InvalidEndpoint { .. } => "invalid_endpoint",
            Self::Connect(_) => "connect_failed",
            Self::Stream(_) => "stream_failed",
            Self::Closed => "closed",
        }
    }

    /// Whether the reconnect loop should treat this as a recoverable drop.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Stream(_))
    }
}
