//! Hard limits on everything that enters session state.
//!
//! Sizes are UTF-8 byte lengths. Everything sourced from outside (tokens,
//! tool args, history records) passes through here before it is stored.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::message::ConversationMessage;

/// Messages kept in a session; older ones are evicted first.
pub const MAX_MESSAGES: usize = 500;
/// Per-message content cap.
pub const MAX_CONTENT_BYTES: usize = 100_000;
/// Longest text a user may send.
pub const MAX_INPUT_BYTES: usize = 10_000;
pub const MAX_TOOLS_PER_MESSAGE: usize = 50;
/// Serialized size above which tool args are replaced by a marker.
pub const MAX_TOOL_ARGS_BYTES: usize = 10_000;
pub const MAX_CARDS_PER_MESSAGE: usize = 10;
pub const MAX_CARD_DATA_BYTES: usize = 50_000;
/// Longest message id accepted from the server.
pub const MAX_ID_LEN: usize = 256;

/// Serialized length of a JSON value.
pub fn json_size(value: &Value) -> usize {
    serde_json::to_vec(value).map_or(usize::MAX, |bytes| bytes.len())
}

/// Pass `args` through unchanged if small enough, otherwise substitute
/// `{"truncated": true, "original_size": n}`.
pub fn cap_tool_args(args: Value) -> Value {
    let size = json_size(&args);
    if size <= MAX_TOOL_ARGS_BYTES {
        args
    } else {
        json!({ "truncated": true, "original_size": size })
    }
}

/// Cut `content` to at most `max` bytes without splitting a character.
pub fn truncate_to_boundary(mut content: String, max: usize) -> String {
    if content.len() <= max {
        return content;
    }
    let mut end = max;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    content.truncate(end);
    content
}

pub fn valid_id(id: &str) -> bool {
    !id.trim().is_empty() && id.len() <= MAX_ID_LEN && !id.chars().any(char::is_control)
}

/// Drop the oldest messages until at most [`MAX_MESSAGES`] remain.
pub fn evict_oldest(messages: &mut Vec<Arc<ConversationMessage>>) {
    if messages.len() > MAX_MESSAGES {
        let excess = messages.len() - MAX_MESSAGES;
        messages.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_args_pass_through() {
        let args = json!({"query": "rust jobs", "limit": 10});
        assert_eq!(cap_tool_args(args.clone()), args);
    }

    #[test]
    fn large_args_become_a_marker() {
        let big = "x".repeat(MAX_TOOL_ARGS_BYTES);
        let args = json!({ "blob": big });
        let size = json_size(&args);
        assert_eq!(
            cap_tool_args(args),
            json!({ "truncated": true, "original_size": size })
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // "é" is two bytes; a cut at 3 would land inside the second one.
        let s = "éé".to_string();
        assert_eq!(truncate_to_boundary(s, 3), "é");
        assert_eq!(truncate_to_boundary("abc".to_string(), 10), "abc");
        assert_eq!(truncate_to_boundary("abcdef".to_string(), 4), "abcd");
    }

    #[test]
    fn id_validation() {
        assert!(valid_id("msg-42"));
        assert!(!valid_id(""));
        assert!(!valid_id("   "));
        assert!(!valid_id("a\nb"));
        assert!(!valid_id(&"i".repeat(MAX_ID_LEN + 1)));
    }

    #[test]
    fn eviction_keeps_newest() {
        let mut messages: Vec<_> = (0..MAX_MESSAGES + 3)
            .map(|n| Arc::new(ConversationMessage::user(n.to_string(), String::new())))
            .collect();
        evict_oldest(&mut messages);
        assert_eq!(messages.len(), MAX_MESSAGES);
        assert_eq!(messages[0].id, "3");
        assert_eq!(messages[MAX_MESSAGES - 1].id, (MAX_MESSAGES + 2).to_string());
    }
}
