//! Conversation message model.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    System,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "agent" => Some(Self::Agent),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::System => "system",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Running,
    Success,
    Error,
}

impl ToolStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One tool invocation made by the agent during a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub args: Value,
    pub status: ToolStatus,
}

/// Kinds of structured attachment a message may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardType {
    Posting,
    Application,
    Resume,
    Persona,
}

impl CardType {
    /// Allowlist lookup; anything else is not a card we render.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "posting" => Some(Self::Posting),
            "application" => Some(Self::Application),
            "resume" => Some(Self::Resume),
            "persona" => Some(Self::Persona),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    #[serde(rename = "type")]
    pub card_type: CardType,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_streaming: bool,
    #[serde(default)]
    pub tools: Vec<ToolCall>,
    #[serde(default)]
    pub cards: Vec<Card>,
}

impl ConversationMessage {
    fn new(id: String, role: Role, content: String) -> Self {
        Self {
            id,
            role,
            content,
            timestamp: Utc::now(),
            is_streaming: false,
            tools: Vec::new(),
            cards: Vec::new(),
        }
    }

    pub fn user(id: String, content: String) -> Self {
        Self::new(id, Role::User, content)
    }

    /// An agent reply still receiving tokens.
    pub fn streaming_agent(id: String, first_chunk: String) -> Self {
        Self {
            is_streaming: true,
            ..Self::new(id, Role::Agent, first_chunk)
        }
    }

    pub fn system(id: String, content: String) -> Self {
        Self::new(id, Role::System, content)
    }

    pub fn is_streaming_agent(&self) -> bool {
        self.role == Role::Agent && self.is_streaming
    }
}

/// Placeholder id for a message the server has not acknowledged yet.
pub fn local_id() -> String {
    format!("local-{}", uuid::Uuid::new_v4())
}
