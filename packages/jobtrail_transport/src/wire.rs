//! Wire format of the assistant push stream.
//!
//! Every payload is a JSON object tagged by `type`. Payloads are untrusted:
//! [`parse_payload`] either returns a fully validated [`WireEvent`] or a
//! [`DropReason`], never a partially usable value.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Largest payload accepted from the stream, in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Longest tool name accepted in `tool_start` / `tool_result`.
pub const MAX_TOOL_NAME_LEN: usize = 128;

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    /// Next chunk of the agent's reply.
    ChatToken { text: String },
    /// The agent turn is complete; `message_id` is the server-assigned id.
    ChatDone { message_id: String },
    /// The agent started a tool call.
    ToolStart {
        tool: String,
        args: Map<String, Value>,
    },
    /// A tool call finished.
    ToolResult { tool: String, success: bool },
    /// A server-side record changed; cached queries keyed on it are stale.
    DataChanged {
        resource: String,
        id: String,
        action: String,
    },
    /// Keepalive, carries nothing.
    Heartbeat,
}

/// Why an inbound payload was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Oversized,
    Malformed,
    Invalid,
}

/// Chat-facing subset of the stream, consumed by the session reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Token { text: String },
    Done { message_id: Option<String> },
    ToolStart { tool: String, args: Value },
    ToolResult { tool: String, success: bool },
}

/// Cache-invalidation notice, forwarded unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataChanged {
    pub resource: String,
    pub id: String,
    pub action: String,
}

/// Where a validated event is delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Chat(ChatEvent),
    DataChanged(DataChanged),
    Keepalive,
}

impl WireEvent {
    /// Checks constraints serde cannot express on its own.
    fn validate(&self) -> bool {
        match self {
            Self::ToolStart { tool, .. } | Self::ToolResult { tool, .. } => {
                !tool.is_empty() && tool.len() <= MAX_TOOL_NAME_LEN
            }
            Self::DataChanged {
                resource, action, ..
            } => !resource.is_empty() && !action.is_empty(),
            Self::ChatToken { .. } | Self::ChatDone { .. } | Self::Heartbeat => true,
        }
    }

    pub fn into_route(self) -> Route {
        match self {
            Self::ChatToken { text } => Route::Chat(ChatEvent::Token { text }),
            Self::ChatDone { message_id } => Route::Chat(ChatEvent::Done {
                message_id: Some(message_id).filter(|id| !id.is_empty()),
            }),
            Self::ToolStart { tool, args } => Route::Chat(ChatEvent::ToolStart {
                tool,
                args: Value::Object(args),
            }),
            Self::ToolResult { tool, success } => {
                Route::Chat(ChatEvent::ToolResult { tool, success })
            }
            Self::DataChanged {
                resource,
                id,
                action,
            } => Route::DataChanged(DataChanged {
                resource,
                id,
                action,
            }),
            Self::Heartbeat => Route::Keepalive,
        }
    }
}

/// Parse and validate one raw payload.
///
/// The size check runs before any parsing so oversized input is never
/// handed to the JSON parser.
pub fn parse_payload(raw: &str, max_bytes: usize) -> Result<WireEvent, DropReason> {
    if raw.len() > max_bytes {
        return Err(DropReason::Oversized);
    }

    let value: Value = serde_json::from_str(raw).map_err(|_| DropReason::Malformed)?;
    if !value.is_object() {
        return Err(DropReason::Invalid);
    }

    let event: WireEvent = serde_json::from_value(value).map_err(|_| DropReason::Invalid)?;
    if !event.validate() {
        return Err(DropReason::Invalid);
    }

    Ok(event)
}
