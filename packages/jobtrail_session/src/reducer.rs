//! The session reducer: `(state, action) -> (state, effect)`.
//!
//! `apply` does no I/O. Network work is described by the returned
//! [`SessionEffect`] and performed by whoever owns the state (normally
//! [`SessionActor`](crate::SessionActor)), which feeds the outcome back in
//! as another action.
//!
//! Messages are shared as `Arc`s so snapshots are cheap; only the streaming
//! tail is ever copied on write.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use jobtrail_transport::ChatEvent;

use crate::bounds::{
    MAX_CONTENT_BYTES, MAX_INPUT_BYTES, MAX_TOOLS_PER_MESSAGE, cap_tool_args, evict_oldest,
    valid_id,
};
use crate::history::sanitize_history;
use crate::message::{ConversationMessage, Role, ToolCall, ToolStatus, local_id};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// The user typed something.
    Send { text: String },
    /// The server stored the message sent under `local_id`.
    SendAccepted { local_id: String, server_id: String },
    /// Submitting a message failed.
    SendFailed { error: String },
    Token { text: String },
    ToolStarted { tool: String, args: Value },
    ToolFinished { tool: String, success: bool },
    /// The agent turn is over.
    Done { message_id: Option<String> },
    /// Replace the conversation with server history.
    LoadHistory { entries: Vec<Value> },
    Clear,
}

impl SessionAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Send { .. } => "send",
            Self::SendAccepted { .. } => "send_accepted",
            Self::SendFailed { .. } => "send_failed",
            Self::Token { .. } => "token",
            Self::ToolStarted { .. } => "tool_started",
            Self::ToolFinished { .. } => "tool_finished",
            Self::Done { .. } => "done",
            Self::LoadHistory { .. } => "load_history",
            Self::Clear => "clear",
        }
    }
}

impl From<ChatEvent> for SessionAction {
    fn from(event: ChatEvent) -> Self {
        match event {
            ChatEvent::Token { text } => Self::Token { text },
            ChatEvent::Done { message_id } => Self::Done { message_id },
            ChatEvent::ToolStart { tool, args } => Self::ToolStarted { tool, args },
            ChatEvent::ToolResult { tool, success } => Self::ToolFinished { tool, success },
        }
    }
}

/// Work the owner must carry out on the reducer's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    /// POST `content`; report back with `SendAccepted` or `SendFailed`.
    Submit { local_id: String, content: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    messages: Vec<Arc<ConversationMessage>>,
    streaming: bool,
    /// Bumped whenever the list is replaced wholesale.
    epoch: u64,
    /// Messages appended during this epoch, evicted ones included.
    appended: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Arc<ConversationMessage>] {
        &self.messages
    }

    /// A send is in flight or an agent reply is arriving.
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn last(&self) -> Option<&ConversationMessage> {
        self.messages.last().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Changes each time the conversation is cleared or reloaded, so
    /// observers know to redraw from scratch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Running count of appended messages within the current epoch. Unlike
    /// `len()` it keeps growing once eviction starts.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    pub fn apply(mut self, action: SessionAction) -> (Self, Option<SessionEffect>) {
        let effect = match action {
            SessionAction::Send { text } => self.send(text),
            SessionAction::SendAccepted {
                local_id,
                server_id,
            } => {
                self.accept(&local_id, server_id);
                None
            }
            SessionAction::SendFailed { error } => {
                self.fail_send(&error);
                None
            }
            SessionAction::Token { text } => {
                self.token(text);
                None
            }
            SessionAction::ToolStarted { tool, args } => {
                self.tool_started(tool, args);
                None
            }
            SessionAction::ToolFinished { tool, success } => {
                self.tool_finished(&tool, success);
                None
            }
            SessionAction::Done { message_id } => {
                self.done(message_id);
                None
            }
            SessionAction::LoadHistory { entries } => {
                self.replace(sanitize_history(entries));
                None
            }
            SessionAction::Clear => {
                self.replace(Vec::new());
                None
            }
        };
        evict_oldest(&mut self.messages);
        (self, effect)
    }

    fn send(&mut self, text: String) -> Option<SessionEffect> {
        let content = text.trim();
        if content.is_empty() {
            debug!("Ignoring empty send");
            return None;
        }
        if content.len() > MAX_INPUT_BYTES {
            debug!(bytes = content.len(), "Ignoring oversized send");
            return None;
        }
        if self.streaming {
            debug!("Ignoring send while another is in flight");
            return None;
        }

        let id = local_id();
        let content = content.to_string();
        self.push(ConversationMessage::user(id.clone(), content.clone()));
        self.streaming = true;
        Some(SessionEffect::Submit {
            local_id: id,
            content,
        })
    }

    fn accept(&mut self, local_id: &str, server_id: String) {
        if !valid_id(&server_id) {
            debug!("Ignoring unusable server id for {local_id}");
            return;
        }
        if let Some(msg) = self
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.role == Role::User && m.id == local_id)
        {
            Arc::make_mut(msg).id = server_id;
        }
    }

    fn fail_send(&mut self, error: &str) {
        self.finalize_streaming(None);
        self.streaming = false;
        self.push(ConversationMessage::system(
            local_id(),
            format!("Failed to send message: {error}"),
        ));
    }

    fn token(&mut self, text: String) {
        if let Some(tail) = self.streaming_tail() {
            if tail.content.len() + text.len() > MAX_CONTENT_BYTES {
                debug!(bytes = text.len(), "Dropping token past the content cap");
                return;
            }
            tail.content.push_str(&text);
        } else {
            if text.len() > MAX_CONTENT_BYTES {
                debug!(bytes = text.len(), "Dropping token past the content cap");
                return;
            }
            self.push(ConversationMessage::streaming_agent(local_id(), text));
        }
        self.streaming = true;
    }

    fn tool_started(&mut self, tool: String, args: Value) {
        let Some(tail) = self.streaming_tail() else {
            debug!(tool = %tool, "Ignoring tool start outside an agent reply");
            return;
        };
        if tail.tools.len() >= MAX_TOOLS_PER_MESSAGE {
            debug!(tool = %tool, "Ignoring tool start past the per-message cap");
            return;
        }
        tail.tools.push(ToolCall {
            tool,
            args: cap_tool_args(args),
            status: ToolStatus::Running,
        });
    }

    fn tool_finished(&mut self, tool: &str, success: bool) {
        let Some(tail) = self.messages.last_mut() else {
            return;
        };
        if tail.role != Role::Agent {
            return;
        }
        let Some(index) = tail
            .tools
            .iter()
            .rposition(|t| t.tool == tool && t.status == ToolStatus::Running)
        else {
            return;
        };
        Arc::make_mut(tail).tools[index].status = if success {
            ToolStatus::Success
        } else {
            ToolStatus::Error
        };
    }

    fn done(&mut self, message_id: Option<String>) {
        let server_id = message_id.filter(|id| valid_id(id));
        self.finalize_streaming(server_id);
        self.streaming = false;
    }

    fn push(&mut self, message: ConversationMessage) {
        self.messages.push(Arc::new(message));
        self.appended += 1;
    }

    fn replace(&mut self, messages: Vec<Arc<ConversationMessage>>) {
        self.appended = messages.len() as u64;
        self.messages = messages;
        self.streaming = false;
        self.epoch += 1;
    }

    fn finalize_streaming(&mut self, server_id: Option<String>) {
        for msg in self.messages.iter_mut().filter(|m| m.is_streaming) {
            let msg = Arc::make_mut(msg);
            msg.is_streaming = false;
            if let Some(id) = &server_id {
                msg.id = id.clone();
            }
        }
    }

    /// The tail message, if it is an agent reply still receiving tokens.
    fn streaming_tail(&mut self) -> Option<&mut ConversationMessage> {
        let tail = self.messages.last_mut()?;
        if tail.is_streaming_agent() {
            Some(Arc::make_mut(tail))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::{MAX_MESSAGES, MAX_TOOL_ARGS_BYTES};
    use serde_json::json;

    fn apply(state: SessionState, action: SessionAction) -> SessionState {
        state.apply(action).0
    }

    fn token(text: &str) -> SessionAction {
        SessionAction::Token {
            text: text.to_string(),
        }
    }

    fn tool_start(tool: &str) -> SessionAction {
        SessionAction::ToolStarted {
            tool: tool.to_string(),
            args: json!({"q": "rust"}),
        }
    }

    fn tool_done(tool: &str, success: bool) -> SessionAction {
        SessionAction::ToolFinished {
            tool: tool.to_string(),
            success,
        }
    }

    fn send(text: &str) -> SessionAction {
        SessionAction::Send {
            text: text.to_string(),
        }
    }

    #[test]
    fn send_appends_user_message_and_emits_submit() {
        let (state, effect) = SessionState::new().apply(send("  find rust roles \n"));

        assert_eq!(state.len(), 1);
        let msg = state.last().unwrap();
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "find rust roles");
        assert!(state.is_streaming());
        assert_eq!(
            effect,
            Some(SessionEffect::Submit {
                local_id: msg.id.clone(),
                content: "find rust roles".to_string()
            })
        );
    }

    #[test]
    fn bad_input_is_rejected_without_effect() {
        let long = "x".repeat(MAX_INPUT_BYTES + 1);
        for text in ["", "   ", "\n\t", long.as_str()] {
            let (state, effect) = SessionState::new().apply(send(text));
            assert!(state.is_empty(), "{text:?} appended a message");
            assert!(!state.is_streaming());
            assert_eq!(effect, None);
        }

        let (state, effect) = SessionState::new().apply(send(&"x".repeat(MAX_INPUT_BYTES)));
        assert_eq!(state.len(), 1);
        assert!(effect.is_some());
    }

    #[test]
    fn second_send_while_in_flight_is_rejected() {
        let state = apply(SessionState::new(), send("first"));
        let (state, effect) = state.apply(send("second"));
        assert_eq!(state.len(), 1);
        assert_eq!(effect, None);
    }

    #[test]
    fn accepted_send_takes_the_server_id() {
        let (state, effect) = SessionState::new().apply(send("hello"));
        let Some(SessionEffect::Submit { local_id, .. }) = effect else {
            panic!("expected submit");
        };
        let state = apply(
            state,
            SessionAction::SendAccepted {
                local_id,
                server_id: "srv-7".to_string(),
            },
        );
        assert_eq!(state.last().unwrap().id, "srv-7");
        assert!(state.is_streaming());
    }

    #[test]
    fn failed_send_appends_system_message() {
        let state = apply(SessionState::new(), send("hello"));
        let state = apply(
            state,
            SessionAction::SendFailed {
                error: "server answered 500".to_string(),
            },
        );
        assert_eq!(state.len(), 2);
        assert!(!state.is_streaming());
        let msg = state.last().unwrap();
        assert_eq!(msg.role, Role::System);
        assert!(msg.content.contains("server answered 500"));

        // A new send is possible again.
        let (_, effect) = state.apply(send("retry"));
        assert!(effect.is_some());
    }

    #[test]
    fn tokens_accumulate_into_one_agent_message() {
        let state = apply(SessionState::new(), token("Hel"));
        assert_eq!(state.len(), 1);
        assert!(state.is_streaming());
        assert!(state.last().unwrap().is_streaming_agent());

        let state = apply(state, token("lo"));
        assert_eq!(state.len(), 1);
        assert_eq!(state.last().unwrap().content, "Hello");
    }

    #[test]
    fn tokens_after_a_user_message_start_a_reply() {
        let state = apply(SessionState::new(), send("hi"));
        let state = apply(state, token("Hey"));
        assert_eq!(state.len(), 2);
        assert_eq!(state.last().unwrap().role, Role::Agent);
    }

    #[test]
    fn token_past_the_cap_is_dropped_whole() {
        let state = apply(SessionState::new(), token(&"a".repeat(MAX_CONTENT_BYTES - 2)));
        let state = apply(state, token("bcd"));
        assert_eq!(state.last().unwrap().content.len(), MAX_CONTENT_BYTES - 2);

        let state = apply(state, token("bc"));
        assert_eq!(state.last().unwrap().content.len(), MAX_CONTENT_BYTES);
        assert!(state.last().unwrap().content.ends_with("bc"));
    }

    #[test]
    fn done_finalizes_and_renames() {
        let state = apply(SessionState::new(), token("answer"));
        let state = apply(
            state,
            SessionAction::Done {
                message_id: Some("srv-9".to_string()),
            },
        );
        let msg = state.last().unwrap();
        assert!(!msg.is_streaming);
        assert_eq!(msg.id, "srv-9");
        assert!(!state.is_streaming());

        // The next token starts a fresh reply.
        let state = apply(state, token("more"));
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn done_without_id_keeps_placeholder() {
        let state = apply(SessionState::new(), token("answer"));
        let placeholder = state.last().unwrap().id.clone();
        let state = apply(state, SessionAction::Done { message_id: None });
        assert_eq!(state.last().unwrap().id, placeholder);
    }

    #[test]
    fn done_after_a_silent_turn_just_clears_streaming() {
        let state = apply(SessionState::new(), send("hi"));
        let state = apply(
            state,
            SessionAction::Done {
                message_id: Some("srv-1".to_string()),
            },
        );
        assert!(!state.is_streaming());
        assert_eq!(state.last().unwrap().role, Role::User);
        assert_ne!(state.last().unwrap().id, "srv-1");
    }

    #[test]
    fn tools_attach_to_the_streaming_reply() {
        let state = apply(SessionState::new(), token("Searching"));
        let state = apply(state, tool_start("search_postings"));
        let state = apply(state, tool_start("search_postings"));
        let state = apply(state, tool_done("search_postings", false));

        let tools = &state.last().unwrap().tools;
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].status, ToolStatus::Running);
        assert_eq!(tools[1].status, ToolStatus::Error);

        let state = apply(state, tool_done("search_postings", true));
        assert_eq!(state.last().unwrap().tools[0].status, ToolStatus::Success);
    }

    #[test]
    fn tool_start_without_reply_is_ignored() {
        let state = apply(SessionState::new(), tool_start("search_postings"));
        assert!(state.is_empty());

        let state = apply(state, send("hi"));
        let state = apply(state, tool_start("search_postings"));
        assert!(state.last().unwrap().tools.is_empty());
    }

    #[test]
    fn tool_result_for_unknown_tool_has_no_effect() {
        let state = apply(SessionState::new(), token("x"));
        let state = apply(state, tool_start("a"));
        let before = state.clone();
        let state = apply(state, tool_done("b", true));
        assert_eq!(state, before);

        let state = apply(state, tool_done("a", true));
        let before = state.clone();
        let state = apply(state, tool_done("a", false));
        assert_eq!(state, before);
    }

    #[test]
    fn tool_count_is_capped() {
        let mut state = apply(SessionState::new(), token("busy"));
        for n in 0..MAX_TOOLS_PER_MESSAGE + 5 {
            state = apply(state, tool_start(&format!("t{n}")));
        }
        assert_eq!(state.last().unwrap().tools.len(), MAX_TOOLS_PER_MESSAGE);
    }

    #[test]
    fn oversized_tool_args_are_replaced() {
        let state = apply(SessionState::new(), token("x"));
        let state = apply(
            state,
            SessionAction::ToolStarted {
                tool: "upload".to_string(),
                args: json!({"file": "z".repeat(MAX_TOOL_ARGS_BYTES)}),
            },
        );
        let args = &state.last().unwrap().tools[0].args;
        assert_eq!(args["truncated"], true);
        assert!(args["original_size"].as_u64().unwrap() > MAX_TOOL_ARGS_BYTES as u64);
    }

    #[test]
    fn message_list_is_bounded() {
        let mut state = SessionState::new();
        for n in 0..=MAX_MESSAGES {
            state = apply(state, send(&format!("msg {n}")));
            state = apply(state, SessionAction::Done { message_id: None });
        }
        assert_eq!(state.len(), MAX_MESSAGES);
        assert_eq!(state.messages()[0].content, "msg 1");
        assert_eq!(
            state.last().unwrap().content,
            format!("msg {MAX_MESSAGES}")
        );
    }

    #[test]
    fn clear_and_history_replace_everything() {
        let state = apply(SessionState::new(), token("streaming"));
        let state = apply(state, SessionAction::Clear);
        assert!(state.is_empty());
        assert!(!state.is_streaming());

        let state = apply(state, send("pending"));
        let state = apply(
            state,
            SessionAction::LoadHistory {
                entries: vec![json!({
                    "id": "h1",
                    "role": "agent",
                    "content": "from the server",
                    "timestamp": "2026-03-01T12:00:00Z",
                })],
            },
        );
        assert_eq!(state.len(), 1);
        assert_eq!(state.last().unwrap().id, "h1");
        assert!(!state.is_streaming());
    }

    #[test]
    fn epoch_and_append_counters() {
        let mut state = SessionState::new();
        for n in 0..MAX_MESSAGES + 10 {
            state = apply(state, send(&format!("m{n}")));
            state = apply(state, SessionAction::Done { message_id: None });
        }
        assert_eq!(state.epoch(), 0);
        assert_eq!(state.appended(), (MAX_MESSAGES + 10) as u64);

        let state = apply(state, token("reply"));
        let state = apply(state, token(" continues"));
        assert_eq!(state.appended(), (MAX_MESSAGES + 11) as u64);

        let state = apply(state, SessionAction::Clear);
        assert_eq!(state.epoch(), 1);
        assert_eq!(state.appended(), 0);
    }

    #[test]
    fn snapshots_are_not_disturbed_by_later_tokens() {
        let state = apply(SessionState::new(), token("a"));
        let snapshot = state.clone();
        let state = apply(state, token("b"));
        assert_eq!(snapshot.last().unwrap().content, "a");
        assert_eq!(state.last().unwrap().content, "ab");
    }

    #[test]
    fn chat_events_map_to_actions() {
        let action: SessionAction = ChatEvent::Done {
            message_id: Some("m".to_string()),
        }
        .into();
        assert_eq!(
            action,
            SessionAction::Done {
                message_id: Some("m".to_string())
            }
        );
        assert_eq!(action.kind(), "done");
    }
}
