//! Same-origin stream endpoint.
//!
//! The transport only ever connects to a path relative to the page/app
//! origin. Absolute and protocol-relative URLs are refused up front so a
//! config value can never point the assistant stream at a foreign host.

use std::fmt;

use crate::error::TransportError;

/// Default streaming chat endpoint.
pub const DEFAULT_STREAM_PATH: &str = "/api/chat/stream";

/// A validated, same-origin relative path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamEndpoint(String);

impl StreamEndpoint {
    pub fn parse(path: &str) -> Result<Self, TransportError> {
        let invalid = |reason: &str| TransportError::InvalidEndpoint {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        if !path.starts_with('/') {
            return Err(invalid("must be a relative path starting with '/'"));
        }
        if path.starts_with("//") {
            return Err(invalid("protocol-relative URLs leave the origin"));
        }
        if path.contains('\\') {
            return Err(invalid("backslashes are not allowed"));
        }
        if path.chars().any(char::is_control) {
            return Err(invalid("control characters are not allowed"));
        }

        Ok(Self(path.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StreamEndpoint {
    fn default() -> Self {
        Self(DEFAULT_STREAM_PATH.to_string())
    }
}

impl fmt::Display for StreamEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
