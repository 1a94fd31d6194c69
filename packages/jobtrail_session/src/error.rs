//! Session and HTTP collaborator errors.

/// Failures reported by a [`ChatApi`](crate::ChatApi) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("server answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rate limited, retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl ApiError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Status { .. } => "http_status",
            Self::RateLimited { .. } => "rate_limited",
            Self::Decode(_) => "decode_failed",
            Self::Request(_) => "request_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session task has shut down")]
    Closed,

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl SessionError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Closed => "closed",
            Self::Api(err) => err.error_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_pass_through() {
        let err: SessionError = ApiError::RateLimited {
            retry_after_secs: Some(3),
        }
        .into();
        assert_eq!(err.error_code(), "rate_limited");
        assert_eq!(SessionError::Closed.error_code(), "closed");
    }

    #[test]
    fn status_message_includes_body() {
        let err = ApiError::Status {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "server answered 502: bad gateway");
    }
}
