//! Jobtrail Session - bounded conversation state for the assistant
//!
//! The conversation is a pure reducer ([`SessionState::apply`]) driven by
//! user sends, chat events from the transport and outcomes of the HTTP
//! collaborator. Every externally sourced string or object is size-capped
//! before it is stored, and the message list never grows past
//! [`MAX_MESSAGES`].
//!
//! [`SessionActor`] owns one state and serializes all actions against it;
//! [`SessionHandle`] is what the UI layer holds.

pub mod actor;
pub mod api;
pub mod bounds;
pub mod error;
pub mod history;
pub mod message;
pub mod reducer;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use actor::{SessionActor, SessionConfig, SessionHandle};
pub use api::ChatApi;
pub use bounds::{
    MAX_CARDS_PER_MESSAGE, MAX_CONTENT_BYTES, MAX_INPUT_BYTES, MAX_MESSAGES,
    MAX_TOOL_ARGS_BYTES, MAX_TOOLS_PER_MESSAGE,
};
pub use error::{ApiError, SessionError};
pub use history::sanitize_history;
pub use message::{Card, CardType, ConversationMessage, Role, ToolCall, ToolStatus};
pub use reducer::{SessionAction, SessionEffect, SessionState};
