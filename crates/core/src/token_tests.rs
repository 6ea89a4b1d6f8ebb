// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use yare::parameterized;

#[parameterized(
    job = { "job:flow-abc", WaitReason::Job("flow-abc") },
    message = { "message:order.created", WaitReason::Message("order.created") },
    timer = { "timer:flow-t1", WaitReason::Timer("flow-t1") },
    child = { "child:flow-i9", WaitReason::Child("flow-i9") },
)]
fn wait_reason_round_trip(tag: &str, expected: WaitReason<'_>) {
    let parsed = WaitReason::parse(tag).unwrap();
    assert_eq!(parsed, expected);
    assert_eq!(parsed.to_tag(), tag);
}

#[parameterized(
    empty = { "" },
    unknown = { "signal:boom" },
    no_separator = { "job" },
)]
fn wait_reason_rejects(tag: &str) {
    assert!(WaitReason::parse(tag).is_none());
}

#[test]
fn waiting_invariant_holds() {
    let mut token = Token::builder().build();
    assert!(!token.is_waiting());
    assert!(token.waiting_for.is_none());

    token.set_waiting(&WaitReason::Job("flow-abc"), Utc::now());
    assert!(token.is_waiting());
    assert_eq!(token.waiting_for.as_deref(), Some("job:flow-abc"));
    assert_eq!(token.wait_reason(), Some(WaitReason::Job("flow-abc")));

    token.clear_waiting(Utc::now());
    assert_eq!(token.state, TokenState::Active);
    assert!(token.waiting_for.is_none());
}

#[test]
fn advance_tracks_previous_element() {
    let mut token = Token::builder().current_element_id("a").build();
    token.advance_to("b", Utc::now());
    assert_eq!(token.current_element_id, "b");
    assert_eq!(token.previous_element_id.as_deref(), Some("a"));
}

#[test]
fn branch_clone_links_parent_and_copies_vars() {
    let mut token = Token::builder().current_element_id("fork").build();
    token.variables.insert("a".into(), json!(1));

    let branch = token.clone_for_branch(TokenId::from_string("tok-b"), "next", Utc::now());

    assert_eq!(branch.parent_id, Some(token.id));
    assert_eq!(branch.current_element_id, "next");
    assert_eq!(branch.previous_element_id.as_deref(), Some("fork"));
    assert_eq!(branch.variables.get("a"), Some(&json!(1)));
    assert!(branch.child_ids.is_empty());
    assert_ne!(branch.id, token.id);
}

#[test]
fn terminal_states_clear_wait_tag() {
    let mut token = Token::builder().build();
    token.set_waiting(&WaitReason::Message("m"), Utc::now());
    token.cancel(Utc::now());
    assert!(token.is_terminal());
    assert!(token.waiting_for.is_none());
}

#[test]
fn token_serde_round_trip() {
    let mut token = Token::builder()
        .parent_id(TokenId::from_string("tok-parent"))
        .subprocess_id("sub1")
        .build();
    token.variables.insert("k".into(), json!({"nested": [1, 2]}));
    token.boundary_timer_ids.push(TimerId::from_string("tmr-1"));

    let json = serde_json::to_string(&token).unwrap();
    let back: Token = serde_json::from_str(&json).unwrap();
    assert_eq!(token, back);
}

#[test]
fn token_state_serializes_upper_case() {
    assert_eq!(serde_json::to_string(&TokenState::Waiting).unwrap(), r#""WAITING""#);
    assert_eq!(serde_json::to_string(&TokenType::Execution).unwrap(), r#""EXECUTION""#);
}
