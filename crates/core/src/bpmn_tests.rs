// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn start(id: &str) -> Element {
    Element::StartEvent { id: id.into(), name: None, trigger: EventTrigger::None }
}

fn end(id: &str) -> Element {
    Element::EndEvent { id: id.into(), name: None, trigger: EventTrigger::None }
}

fn task(id: &str) -> Element {
    Element::ServiceTask {
        id: id.into(),
        name: None,
        task: TaskDefinition { task_type: "work".into(), retries: 3 },
        headers: HashMap::new(),
    }
}

fn flow(id: &str, from: &str, to: &str) -> SequenceFlow {
    SequenceFlow { id: id.into(), source_ref: from.into(), target_ref: to.into(), condition: None }
}

fn definition() -> ProcessDefinition {
    ProcessDefinition {
        process_key: "order".into(),
        name: None,
        version: 1,
        elements: vec![
            start("s"),
            task("t1"),
            Element::BoundaryEvent {
                id: "b1".into(),
                name: None,
                attached_to_ref: "t1".into(),
                cancel_activity: true,
                trigger: EventTrigger::Timer {
                    timer: TimerSpec { time_duration: Some("PT10S".into()), ..Default::default() },
                },
            },
            Element::SubProcess {
                id: "sub".into(),
                name: None,
                elements: vec![start("sub_s"), task("sub_t"), end("sub_e")],
                flows: vec![flow("sf1", "sub_s", "sub_t"), flow("sf2", "sub_t", "sub_e")],
            },
            end("e"),
        ],
        flows: vec![flow("f1", "s", "t1"), flow("f2", "t1", "sub"), flow("f3", "sub", "e")],
    }
}

#[test]
fn element_lookup_descends_into_subprocess() {
    let def = definition();
    assert_eq!(def.element("t1").map(Element::id), Some("t1"));
    assert_eq!(def.element("sub_t").map(Element::id), Some("sub_t"));
    assert!(def.element("missing").is_none());
}

#[test]
fn outgoing_searches_owning_scope() {
    let def = definition();
    let top: Vec<_> = def.outgoing("t1").iter().map(|f| f.id.as_str()).collect();
    assert_eq!(top, vec!["f2"]);

    let nested: Vec<_> = def.outgoing("sub_t").iter().map(|f| f.id.as_str()).collect();
    assert_eq!(nested, vec!["sf2"]);

    assert!(def.outgoing("e").is_empty());
}

#[test]
fn incoming_counts_join_arrivals() {
    let mut def = definition();
    def.flows.push(flow("f4", "s", "e"));
    let ids: Vec<_> = def.incoming("e").iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["f3", "f4"]);
}

#[test]
fn boundary_events_match_attached_ref() {
    let def = definition();
    let attached = def.boundary_events("t1");
    assert_eq!(attached.len(), 1);
    assert_eq!(attached[0].id(), "b1");
    assert!(def.boundary_events("sub").is_empty());
}

#[test]
fn start_event_is_top_level_only() {
    let def = definition();
    assert_eq!(def.start_event().map(Element::id), Some("s"));
    assert_eq!(def.subprocess_start("sub").map(Element::id), Some("sub_s"));
}

#[test]
fn start_event_requires_uniqueness() {
    let mut def = definition();
    def.elements.push(start("s2"));
    assert!(def.start_event().is_none());
}

#[test]
fn enclosing_scopes_innermost_first() {
    let def = definition();
    assert_eq!(def.enclosing_scopes("sub_t"), vec!["sub"]);
    assert!(def.enclosing_scopes("t1").is_empty());
}

#[test]
fn message_start_detection() {
    let el = Element::StartEvent {
        id: "ms".into(),
        name: None,
        trigger: EventTrigger::Message { message_name: "order.created".into(), correlation_key: None },
    };
    assert!(el.is_message_start());
    assert!(!start("s").is_message_start());
}

#[test]
fn definition_serde_round_trip() {
    let def = definition();
    let json = serde_json::to_string(&def).unwrap();
    let back: ProcessDefinition = serde_json::from_str(&json).unwrap();
    assert_eq!(def, back);
}

#[test]
fn boundary_cancel_activity_defaults_true() {
    let json = r#"{
        "type": "boundaryEvent",
        "id": "b",
        "attached_to_ref": "t",
        "trigger": { "kind": "error", "error_code": "E1" }
    }"#;
    let el: Element = serde_json::from_str(json).unwrap();
    match el {
        Element::BoundaryEvent { cancel_activity, .. } => assert!(cancel_activity),
        other => panic!("unexpected element: {:?}", other),
    }
}
