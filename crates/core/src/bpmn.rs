// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tagged-variant BPMN element model.
//!
//! One variant per element kind the engine executes. The XML parser is an
//! external collaborator; deployments arrive here already parsed, and the
//! untyped key/value form never crosses into this crate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Event definition attached to a start, end, catch, or boundary event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventTrigger {
    #[default]
    None,
    Message {
        message_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_key: Option<String>,
    },
    Timer {
        timer: TimerSpec,
    },
    Signal {
        signal_name: String,
    },
    Error {
        error_code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_name: Option<String>,
    },
}

/// Raw timer definition from a `timerEventDefinition`.
///
/// Exactly one field is expected to be set; values may be FEEL expressions
/// (prefixed `=`) that are evaluated against token variables at schedule
/// time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_cycle: Option<String>,
}

/// `taskDefinition` extension element of a service task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub retries: u32,
}

/// A sequence flow between two elements, optionally guarded by a condition
/// expression evaluated against token variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceFlow {
    pub id: String,
    pub source_ref: String,
    pub target_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// One executable BPMN element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Element {
    StartEvent {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        trigger: EventTrigger,
    },
    EndEvent {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        trigger: EventTrigger,
    },
    ServiceTask {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        task: TaskDefinition,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
    ScriptTask {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        script: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_variable: Option<String>,
    },
    ExclusiveGateway {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_flow: Option<String>,
    },
    ParallelGateway {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    InclusiveGateway {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_flow: Option<String>,
    },
    EventBasedGateway {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    IntermediateCatchEvent {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        trigger: EventTrigger,
    },
    BoundaryEvent {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        attached_to_ref: String,
        /// Interrupting boundary events cancel the activity they observe.
        #[serde(default = "default_true")]
        cancel_activity: bool,
        trigger: EventTrigger,
    },
    CallActivity {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        process_key: String,
    },
    SubProcess {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        elements: Vec<Element>,
        flows: Vec<SequenceFlow>,
    },
}

fn default_true() -> bool {
    true
}

impl Element {
    pub fn id(&self) -> &str {
        match self {
            Element::StartEvent { id, .. }
            | Element::EndEvent { id, .. }
            | Element::ServiceTask { id, .. }
            | Element::ScriptTask { id, .. }
            | Element::ExclusiveGateway { id, .. }
            | Element::ParallelGateway { id, .. }
            | Element::InclusiveGateway { id, .. }
            | Element::EventBasedGateway { id, .. }
            | Element::IntermediateCatchEvent { id, .. }
            | Element::BoundaryEvent { id, .. }
            | Element::CallActivity { id, .. }
            | Element::SubProcess { id, .. } => id,
        }
    }

    /// Element kind for logs and incident messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Element::StartEvent { .. } => "startEvent",
            Element::EndEvent { .. } => "endEvent",
            Element::ServiceTask { .. } => "serviceTask",
            Element::ScriptTask { .. } => "scriptTask",
            Element::ExclusiveGateway { .. } => "exclusiveGateway",
            Element::ParallelGateway { .. } => "parallelGateway",
            Element::InclusiveGateway { .. } => "inclusiveGateway",
            Element::EventBasedGateway { .. } => "eventBasedGateway",
            Element::IntermediateCatchEvent { .. } => "intermediateCatchEvent",
            Element::BoundaryEvent { .. } => "boundaryEvent",
            Element::CallActivity { .. } => "callActivity",
            Element::SubProcess { .. } => "subProcess",
        }
    }

    /// True for a start event carrying a `messageEventDefinition`.
    pub fn is_message_start(&self) -> bool {
        matches!(
            self,
            Element::StartEvent { trigger: EventTrigger::Message { .. }, .. }
        )
    }
}

/// A deployed, immutable process graph addressable by `(process_key, version)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub process_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub version: u32,
    pub elements: Vec<Element>,
    pub flows: Vec<SequenceFlow>,
}

impl ProcessDefinition {
    /// Storage key under the `bpmn:process:` namespace.
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.process_key, self.version)
    }

    /// Find an element by id, descending into subprocess scopes.
    pub fn element(&self, id: &str) -> Option<&Element> {
        find_element(&self.elements, id)
    }

    /// Outgoing flows of an element in document order, searched in the
    /// scope the element belongs to.
    pub fn outgoing(&self, element_id: &str) -> Vec<&SequenceFlow> {
        collect_flows(&self.elements, &self.flows, element_id, FlowEnd::Source)
    }

    /// Incoming flows of an element in document order.
    pub fn incoming(&self, element_id: &str) -> Vec<&SequenceFlow> {
        collect_flows(&self.elements, &self.flows, element_id, FlowEnd::Target)
    }

    /// Boundary events attached to the given activity.
    pub fn boundary_events(&self, activity_id: &str) -> Vec<&Element> {
        let mut found = Vec::new();
        collect_boundary(&self.elements, activity_id, &mut found);
        found
    }

    /// The unique top-level start event, if one exists.
    pub fn start_event(&self) -> Option<&Element> {
        let mut found = None;
        for el in &self.elements {
            if matches!(el, Element::StartEvent { .. }) {
                if found.is_some() {
                    return None;
                }
                found = Some(el);
            }
        }
        found
    }

    /// The start event inside a subprocess scope.
    pub fn subprocess_start(&self, subprocess_id: &str) -> Option<&Element> {
        match self.element(subprocess_id) {
            Some(Element::SubProcess { elements, .. }) => {
                let mut found = None;
                for el in elements {
                    if matches!(el, Element::StartEvent { .. }) {
                        if found.is_some() {
                            return None;
                        }
                        found = Some(el);
                    }
                }
                found
            }
            _ => None,
        }
    }

    /// The subprocess scope (innermost first) enclosing an element, as a
    /// chain of subprocess ids. Empty for top-level elements.
    pub fn enclosing_scopes(&self, element_id: &str) -> Vec<&str> {
        let mut chain = Vec::new();
        scope_chain(&self.elements, element_id, &mut chain);
        chain
    }
}

fn find_element<'a>(elements: &'a [Element], id: &str) -> Option<&'a Element> {
    for el in elements {
        if el.id() == id {
            return Some(el);
        }
        if let Element::SubProcess { elements: inner, .. } = el {
            if let Some(found) = find_element(inner, id) {
                return Some(found);
            }
        }
    }
    None
}

enum FlowEnd {
    Source,
    Target,
}

fn collect_flows<'a>(
    elements: &'a [Element],
    flows: &'a [SequenceFlow],
    element_id: &str,
    end: FlowEnd,
) -> Vec<&'a SequenceFlow> {
    let matched: Vec<&SequenceFlow> = flows
        .iter()
        .filter(|f| match end {
            FlowEnd::Source => f.source_ref == element_id,
            FlowEnd::Target => f.target_ref == element_id,
        })
        .collect();
    if !matched.is_empty() {
        return matched;
    }
    for el in elements {
        if let Element::SubProcess { elements: inner, flows: inner_flows, .. } = el {
            let nested = collect_flows(
                inner,
                inner_flows,
                element_id,
                match end {
                    FlowEnd::Source => FlowEnd::Source,
                    FlowEnd::Target => FlowEnd::Target,
                },
            );
            if !nested.is_empty() {
                return nested;
            }
        }
    }
    Vec::new()
}

fn collect_boundary<'a>(elements: &'a [Element], activity_id: &str, found: &mut Vec<&'a Element>) {
    for el in elements {
        match el {
            Element::BoundaryEvent { attached_to_ref, .. } if attached_to_ref == activity_id => {
                found.push(el);
            }
            Element::SubProcess { elements: inner, .. } => {
                collect_boundary(inner, activity_id, found);
            }
            _ => {}
        }
    }
}

fn scope_chain<'a>(elements: &'a [Element], element_id: &str, chain: &mut Vec<&'a str>) -> bool {
    for el in elements {
        if el.id() == element_id {
            return true;
        }
        if let Element::SubProcess { id, elements: inner, .. } = el {
            if scope_chain(inner, element_id, chain) {
                chain.push(id);
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
#[path = "bpmn_tests.rs"]
mod tests;
