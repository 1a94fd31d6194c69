//! reqwest-backed [`ChatApi`] for the chat message resource.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde_json::{Value, json};
use tracing::{debug, warn};

use jobtrail_session::{ApiError, ChatApi};
use jobtrail_transport::ReconnectPolicy;

/// Retries after the first 429 before giving up.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;
/// Ceiling on a server-requested `Retry-After`.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);
/// Error bodies are kept for diagnostics only.
const MAX_ERROR_BODY_BYTES: usize = 512;

#[derive(Clone)]
pub struct HttpChatApi {
    client: Client,
    messages_url: Url,
    backoff: ReconnectPolicy,
}

impl HttpChatApi {
    pub fn new(client: Client, origin: &Url, messages_path: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client,
            messages_url: origin.join(messages_path)?,
            backoff: ReconnectPolicy::default(),
        })
    }

    pub async fn submit(&self, content: String) -> Result<String, ApiError> {
        let body = json!({ "content": content });
        let response = self
            .execute(|| self.client.post(self.messages_url.clone()).json(&body))
            .await?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        extract_message_id(&value)
    }

    pub async fn history(&self) -> Result<Vec<Value>, ApiError> {
        let response = self
            .execute(|| self.client.get(self.messages_url.clone()))
            .await?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        extract_history(value)
    }

    /// Send a request, retrying on 429 and mapping non-success statuses.
    async fn execute(&self, build: impl Fn() -> RequestBuilder) -> Result<Response, ApiError> {
        let mut attempt = 0;
        loop {
            let response = build()
                .send()
                .await
                .map_err(|e| ApiError::Request(e.to_string()))?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = parse_retry_after(&response);
                if attempt >= MAX_RATE_LIMIT_RETRIES {
                    warn!(attempts = attempt + 1, "Chat API still rate limited, giving up");
                    return Err(ApiError::RateLimited {
                        retry_after_secs: retry_after.map(|d| d.as_secs()),
                    });
                }
                let delay = retry_after
                    .map(|d| d.min(MAX_RETRY_AFTER))
                    .unwrap_or_else(|| self.backoff.nominal_delay(attempt));
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Rate limited, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ApiError::Status {
                    status: status.as_u16(),
                    body: truncate_body(body),
                });
            }
            return Ok(response);
        }
    }
}

impl ChatApi for HttpChatApi {
    fn submit_message(&self, content: String) -> BoxFuture<'static, Result<String, ApiError>> {
        let api = self.clone();
        Box::pin(async move { api.submit(content).await })
    }

    fn fetch_history(&self) -> BoxFuture<'static, Result<Vec<Value>, ApiError>> {
        let api = self.clone();
        Box::pin(async move { api.history().await })
    }
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    let value = response.headers().get(RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// The server answers a POST with `{"id": ..}` or `{"message_id": ..}`.
fn extract_message_id(value: &Value) -> Result<String, ApiError> {
    ["id", "message_id"]
        .iter()
        .find_map(|key| match value.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) if n.is_u64() || n.is_i64() => Some(n.to_string()),
            _ => None,
        })
        .ok_or_else(|| ApiError::Decode("response carries no message id".to_string()))
}

/// History is either a bare array or wrapped as `{"messages": [..]}`.
fn extract_history(value: Value) -> Result<Vec<Value>, ApiError> {
    match value {
        Value::Array(entries) => Ok(entries),
        Value::Object(mut map) => match map.remove("messages") {
            Some(Value::Array(entries)) => Ok(entries),
            _ => Err(ApiError::Decode("history object has no messages array".to_string())),
        },
        _ => Err(ApiError::Decode("history is not an array".to_string())),
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY_BYTES {
        let mut end = MAX_ERROR_BODY_BYTES;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
