//! Validation of server-supplied conversation history.
//!
//! History arrives as loosely typed JSON. Each record is checked on its
//! own; a bad record is skipped without rejecting its neighbours. Survivors
//! are re-capped exactly like live messages and never stream.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use jobtrail_transport::MAX_TOOL_NAME_LEN;

use crate::bounds::{
    MAX_CARD_DATA_BYTES, MAX_CARDS_PER_MESSAGE, MAX_CONTENT_BYTES, MAX_TOOLS_PER_MESSAGE,
    cap_tool_args, evict_oldest, json_size, truncate_to_boundary, valid_id,
};
use crate::message::{Card, CardType, ConversationMessage, Role, ToolCall, ToolStatus};

/// Turn raw history records into bounded messages, oldest first.
pub fn sanitize_history(entries: Vec<Value>) -> Vec<Arc<ConversationMessage>> {
    let total = entries.len();
    let mut messages: Vec<_> = entries
        .into_iter()
        .filter_map(parse_entry)
        .map(Arc::new)
        .collect();

    let rejected = total - messages.len();
    if rejected > 0 {
        debug!(rejected, total, "Filtered malformed history records");
    }

    evict_oldest(&mut messages);
    messages
}

fn parse_entry(entry: Value) -> Option<ConversationMessage> {
    let Value::Object(record) = entry else {
        return None;
    };

    let id = parse_id(record.get("id")?)?;
    let role = Role::parse(record.get("role")?.as_str()?)?;
    let content = record.get("content")?.as_str()?.to_string();
    let timestamp = parse_timestamp(record.get("timestamp")?)?;
    let tools = parse_list(&record, "tools", parse_tool, MAX_TOOLS_PER_MESSAGE)?;
    let cards = parse_list(&record, "cards", parse_card, MAX_CARDS_PER_MESSAGE)?;

    Some(ConversationMessage {
        id,
        role,
        content: truncate_to_boundary(content, MAX_CONTENT_BYTES),
        timestamp,
        is_streaming: false,
        tools,
        cards,
    })
}

/// String ids as-is, integer ids stringified.
fn parse_id(value: &Value) -> Option<String> {
    let id = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) if n.is_u64() || n.is_i64() => n.to_string(),
        _ => return None,
    };
    valid_id(&id).then_some(id)
}

/// RFC 3339 strings or epoch milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        Value::Number(n) => DateTime::from_timestamp_millis(n.as_i64()?),
        _ => None,
    }
}

/// A missing or null list is empty; anything other than an array rejects
/// the whole record. Bad items inside an array are skipped.
fn parse_list<T>(
    record: &Map<String, Value>,
    key: &str,
    parse_item: fn(&Value) -> Option<T>,
    cap: usize,
) -> Option<Vec<T>> {
    match record.get(key) {
        None | Some(Value::Null) => Some(Vec::new()),
        Some(Value::Array(items)) => Some(items.iter().filter_map(parse_item).take(cap).collect()),
        Some(_) => None,
    }
}

fn parse_tool(value: &Value) -> Option<ToolCall> {
    let tool = value.get("tool")?.as_str()?;
    if tool.is_empty() || tool.len() > MAX_TOOL_NAME_LEN {
        return None;
    }
    let args = match value.get("args") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(args @ Value::Object(_)) => cap_tool_args(args.clone()),
        Some(_) => return None,
    };
    let status = match value.get("status") {
        None => ToolStatus::Success,
        Some(status) => ToolStatus::parse(status.as_str()?)?,
    };
    Some(ToolCall {
        tool: tool.to_string(),
        args,
        status,
    })
}

fn parse_card(value: &Value) -> Option<Card> {
    let card_type = CardType::parse(value.get("type")?.as_str()?)?;
    let data = value.get("data")?;
    if !data.is_object() || json_size(data) > MAX_CARD_DATA_BYTES {
        return None;
    }
    Some(Card {
        card_type,
        data: data.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::{MAX_MESSAGES, MAX_TOOL_ARGS_BYTES};
    use serde_json::json;

    fn record(id: &str, role: &str, content: &str) -> Value {
        json!({
            "id": id,
            "role": role,
            "content": content,
            "timestamp": "2026-03-01T12:00:00Z",
        })
    }

    #[test]
    fn well_formed_records_survive() {
        let messages = sanitize_history(vec![
            record("1", "user", "find me rust jobs"),
            record("2", "agent", "here are three"),
            record("3", "system", "connection restored"),
        ]);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, Role::Agent);
        assert_eq!(messages[1].content, "here are three");
        assert!(messages.iter().all(|m| !m.is_streaming));
    }

    #[test]
    fn bad_records_are_filtered_individually() {
        let messages = sanitize_history(vec![
            record("1", "user", "ok"),
            record("2", "assistant", "unknown role"),
            json!({"id": "3", "role": "user", "timestamp": "2026-03-01T12:00:00Z"}),
            json!({"id": "4", "role": "user", "content": "bad time", "timestamp": "yesterday"}),
            json!({"id": "", "role": "user", "content": "empty id", "timestamp": 0}),
            json!("not an object"),
            json!(null),
            record("5", "agent", "also ok"),
        ]);
        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "5"]);
    }

    #[test]
    fn numeric_ids_and_epoch_timestamps() {
        let messages = sanitize_history(vec![json!({
            "id": 42,
            "role": "agent",
            "content": "hi",
            "timestamp": 1_772_366_400_000i64,
        })]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "42");
        assert_eq!(messages[0].timestamp.timestamp_millis(), 1_772_366_400_000);
    }

    #[test]
    fn streaming_flag_is_forced_off() {
        let mut entry = record("1", "agent", "partial");
        entry["is_streaming"] = json!(true);
        let messages = sanitize_history(vec![entry]);
        assert!(!messages[0].is_streaming);
    }

    #[test]
    fn non_array_lists_reject_the_record() {
        let mut tools = record("1", "agent", "x");
        tools["tools"] = json!({"tool": "search"});
        let mut cards = record("2", "agent", "y");
        cards["cards"] = json!("posting");
        let mut null_lists = record("3", "agent", "z");
        null_lists["tools"] = Value::Null;
        null_lists["cards"] = Value::Null;

        let messages = sanitize_history(vec![tools, cards, null_lists]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "3");
    }

    #[test]
    fn tools_are_recapped() {
        let mut entry = record("1", "agent", "done");
        let mut tools: Vec<Value> = (0..MAX_TOOLS_PER_MESSAGE + 5)
            .map(|n| json!({"tool": format!("t{n}"), "args": {}, "status": "success"}))
            .collect();
        tools.insert(0, json!({"tool": "", "status": "success"}));
        tools.insert(1, json!({"tool": "bad_status", "status": "exploded"}));
        tools.insert(
            2,
            json!({"tool": "huge", "args": {"blob": "x".repeat(MAX_TOOL_ARGS_BYTES)}, "status": "error"}),
        );
        entry["tools"] = Value::Array(tools);

        let messages = sanitize_history(vec![entry]);
        let tools = &messages[0].tools;
        assert_eq!(tools.len(), MAX_TOOLS_PER_MESSAGE);
        assert_eq!(tools[0].tool, "huge");
        assert_eq!(tools[0].args["truncated"], true);
        assert_eq!(tools[0].status, ToolStatus::Error);
        assert_eq!(tools[1].tool, "t0");
    }

    #[test]
    fn cards_follow_the_allowlist() {
        let mut entry = record("1", "agent", "matches");
        let mut cards = vec![
            json!({"type": "posting", "data": {"title": "Rust engineer"}}),
            json!({"type": "iframe", "data": {"src": "x"}}),
            json!({"type": "resume", "data": "not an object"}),
            json!({"type": "persona", "data": {"blob": "y".repeat(MAX_CARD_DATA_BYTES)}}),
        ];
        cards.extend((0..20).map(|n| json!({"type": "application", "data": {"n": n}})));
        entry["cards"] = Value::Array(cards);

        let messages = sanitize_history(vec![entry]);
        let cards = &messages[0].cards;
        assert_eq!(cards.len(), MAX_CARDS_PER_MESSAGE);
        assert_eq!(cards[0].card_type, CardType::Posting);
        assert!(cards[1..].iter().all(|c| c.card_type == CardType::Application));
    }

    #[test]
    fn content_is_recapped_on_load() {
        let long = "é".repeat(MAX_CONTENT_BYTES);
        let messages = sanitize_history(vec![record("1", "agent", &long)]);
        assert!(messages[0].content.len() <= MAX_CONTENT_BYTES);
        assert_eq!(messages[0].content.len(), MAX_CONTENT_BYTES);
    }

    #[test]
    fn only_the_newest_are_kept() {
        let entries: Vec<Value> = (0..MAX_MESSAGES + 20)
            .map(|n| record(&n.to_string(), "user", "m"))
            .collect();
        let messages = sanitize_history(entries);
        assert_eq!(messages.len(), MAX_MESSAGES);
        assert_eq!(messages[0].id, "20");
    }
}
