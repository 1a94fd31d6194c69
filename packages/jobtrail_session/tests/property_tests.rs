use proptest::prelude::*;
use serde_json::json;

use jobtrail_session::{
    MAX_CONTENT_BYTES, MAX_MESSAGES, MAX_TOOLS_PER_MESSAGE, Role, SessionAction, SessionEffect,
    SessionState,
};

fn arb_tool() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("search_postings".to_string()),
        Just("update_application".to_string()),
        Just("tailor_resume".to_string()),
    ]
}

fn arb_action() -> impl Strategy<Value = SessionAction> {
    prop_oneof![
        3 => "[ a-z]{0,24}".prop_map(|text| SessionAction::Send { text }),
        6 => "\\PC{0,40}".prop_map(|text| SessionAction::Token { text }),
        1 => (0usize..40_000).prop_map(|n| SessionAction::Token { text: "z".repeat(n) }),
        2 => arb_tool().prop_map(|tool| SessionAction::ToolStarted { tool, args: json!({"q": 1}) }),
        2 => (arb_tool(), any::<bool>())
            .prop_map(|(tool, success)| SessionAction::ToolFinished { tool, success }),
        2 => proptest::option::of("srv-[0-9]{1,4}")
            .prop_map(|message_id| SessionAction::Done { message_id }),
        1 => "[a-z ]{1,20}".prop_map(|error| SessionAction::SendFailed { error }),
        1 => Just(SessionAction::Clear),
    ]
}

fn check_invariants(state: &SessionState) -> Result<(), TestCaseError> {
    prop_assert!(state.len() <= MAX_MESSAGES);

    let streaming: Vec<usize> = state
        .messages()
        .iter()
        .enumerate()
        .filter(|(_, m)| m.is_streaming)
        .map(|(i, _)| i)
        .collect();
    prop_assert!(streaming.len() <= 1, "more than one streaming message");
    if let Some(&index) = streaming.first() {
        prop_assert_eq!(index, state.len() - 1, "streaming message is not the tail");
        prop_assert_eq!(state.messages()[index].role, Role::Agent);
        prop_assert!(state.is_streaming());
    }

    for msg in state.messages() {
        prop_assert!(msg.content.len() <= MAX_CONTENT_BYTES);
        prop_assert!(msg.tools.len() <= MAX_TOOLS_PER_MESSAGE);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn invariants_hold_for_any_action_sequence(actions in prop::collection::vec(arb_action(), 0..200)) {
        let mut state = SessionState::new();
        for action in actions {
            state = state.apply(action).0;
            check_invariants(&state)?;
        }
    }

    #[test]
    fn blank_sends_never_append(text in "[ \\t\\n]{0,32}", prior in prop::collection::vec(arb_action(), 0..20)) {
        let mut state = SessionState::new();
        for action in prior {
            state = state.apply(action).0;
        }
        let before = state.clone();
        let (after, effect) = state.apply(SessionAction::Send { text });
        prop_assert_eq!(effect, None);
        prop_assert_eq!(after, before);
    }

    #[test]
    fn send_effect_matches_the_appended_message(text in "[a-z][a-z ]{0,30}") {
        let (state, effect) = SessionState::new().apply(SessionAction::Send { text: text.clone() });
        let last = state.last().unwrap();
        prop_assert_eq!(
            effect,
            Some(SessionEffect::Submit { local_id: last.id.clone(), content: text.trim().to_string() })
        );
    }

    #[test]
    fn consecutive_tokens_concatenate(chunks in prop::collection::vec("\\PC{1,16}", 1..30)) {
        let mut state = SessionState::new();
        for chunk in &chunks {
            state = state.apply(SessionAction::Token { text: chunk.clone() }).0;
        }
        prop_assert_eq!(state.len(), 1);
        prop_assert_eq!(&state.last().unwrap().content, &chunks.concat());
    }
}

#[test]
fn the_501st_message_evicts_the_oldest() {
    let mut state = SessionState::new();
    for n in 0..=MAX_MESSAGES {
        state = state.apply(SessionAction::Send { text: format!("m{n}") }).0;
        state = state.apply(SessionAction::Done { message_id: None }).0;
    }
    assert_eq!(state.len(), MAX_MESSAGES);
    assert_eq!(state.messages()[0].content, "m1");
}
