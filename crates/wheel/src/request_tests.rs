// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use flow_core::TimerState;
use yare::parameterized;

fn request() -> TimerRequest {
    TimerRequest::duration(
        "timer1",
        TokenId::from_string("tok-1"),
        InstanceId::from_string("inst-1"),
        TimerType::Event,
        "PT30S",
    )
}

#[test]
fn duration_request_validates() {
    let def = request().validate().unwrap();
    assert_eq!(def, TimerDefinition::Duration("PT30S".into()));
}

#[parameterized(
    missing_element = { |r: &mut TimerRequest| r.element_id.clear() },
    missing_token = { |r: &mut TimerRequest| r.token_id = TokenId::from_string("") },
    missing_instance = { |r: &mut TimerRequest| r.process_instance_id = InstanceId::from_string("") },
    no_definition = { |r: &mut TimerRequest| r.time_duration = None },
    two_definitions = { |r: &mut TimerRequest| r.time_date = Some("2026-08-01".into()) },
    malformed_duration = { |r: &mut TimerRequest| r.time_duration = Some("30 seconds".into()) },
)]
fn invalid_requests_are_rejected(mutate: fn(&mut TimerRequest)) {
    let mut req = request();
    mutate(&mut req);
    assert!(req.validate().is_err());
}

#[test]
fn resolve_duration_due_is_base_plus_delta() {
    let base = flow_core::parse_date("2026-08-01T00:00:00Z").unwrap();
    let (due, reps) = resolve_due(&TimerDefinition::Duration("PT30S".into()), base).unwrap();
    assert_eq!(due, base + chrono::Duration::seconds(30));
    assert_eq!(reps, None);
}

#[test]
fn resolve_cycle_keeps_repetitions() {
    let base = flow_core::parse_date("2026-08-01T00:00:00Z").unwrap();
    let (due, reps) = resolve_due(&TimerDefinition::Cycle("R3/PT1S".into()), base).unwrap();
    assert_eq!(due, base + chrono::Duration::seconds(1));
    assert_eq!(reps, Some(3));
}

#[test]
fn resolve_date_ignores_base() {
    let base = flow_core::parse_date("2020-01-01T00:00:00Z").unwrap();
    let target = "2026-08-01T12:00:00Z";
    let (due, _) = resolve_due(&TimerDefinition::Date(target.into()), base).unwrap();
    assert_eq!(due, flow_core::parse_date(target).unwrap());
}

#[test]
fn fired_event_serde_round_trip() {
    let fired = TimerFired {
        timer_id: TimerId::from_string("tmr-1"),
        element_id: "timer1".into(),
        token_id: TokenId::from_string("tok-1"),
        process_instance_id: InstanceId::from_string("inst-1"),
        timer_type: TimerType::Boundary,
        process_context: None,
        fired_at: Utc::now(),
        variables: Variables::new(),
    };
    let json = serde_json::to_string(&fired).unwrap();
    let back: TimerFired = serde_json::from_str(&json).unwrap();
    assert_eq!(fired, back);
}

#[test]
fn scheduled_is_the_only_non_terminal_state() {
    assert!(!TimerState::Scheduled.is_terminal());
}
