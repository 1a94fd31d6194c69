//! The HTTP collaborator the session delegates to.

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::ApiError;

/// Chat message resource on the server.
///
/// Auth, retries and error envelopes are the implementation's business;
/// the session only sees the final outcome.
pub trait ChatApi: Send + Sync + 'static {
    /// POST a user message, returning the id the server assigned it.
    fn submit_message(&self, content: String) -> BoxFuture<'static, Result<String, ApiError>>;

    /// GET prior conversation records, oldest first, unvalidated.
    fn fetch_history(&self) -> BoxFuture<'static, Result<Vec<Value>, ApiError>>;
}
