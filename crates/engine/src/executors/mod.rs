// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-element executors.
//!
//! Each executor advances one token across one element and reports what
//! happened through [`ExecutionResult`]. Executors that fork or join
//! persist the tokens they create and push their IDs into `spawned`; the
//! engine runs those after the current token reaches a resting state.

mod event;
mod gateway;
mod task;
mod subprocess;

use crate::engine::TokenEngine;
use crate::error::EngineError;
use flow_core::{Clock, Element, ProcessDefinition, ProcessInstance, Token, TokenId};

/// Outcome of executing one element.
///
/// At most one of `waiting_for`, `completed`, or `next_elements` drives
/// the engine's next step; `error` carries a catchable BPMN error code
/// that triggers boundary propagation instead.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    pub token_updated: bool,
    pub next_elements: Vec<String>,
    pub waiting_for: Option<String>,
    pub completed: bool,
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Move on to the given elements.
    pub fn advance(next_elements: Vec<String>) -> Self {
        Self { success: true, token_updated: true, next_elements, ..Default::default() }
    }

    /// Park the token with the given wait tag.
    pub fn waiting(tag: String) -> Self {
        Self { success: true, token_updated: true, waiting_for: Some(tag), ..Default::default() }
    }

    /// The token is done (end event, join arrival, fork parent).
    pub fn completed() -> Self {
        Self { success: true, token_updated: true, completed: true, ..Default::default() }
    }

    /// Raise a catchable BPMN error.
    pub fn bpmn_error(code: impl Into<String>) -> Self {
        Self { success: false, error: Some(code.into()), ..Default::default() }
    }
}

impl<C: Clock> TokenEngine<C> {
    /// Dispatch on the element kind.
    pub(crate) async fn execute_element(
        &self,
        token: &mut Token,
        instance: &ProcessInstance,
        definition: &ProcessDefinition,
        element: &Element,
        spawned: &mut Vec<TokenId>,
    ) -> Result<ExecutionResult, EngineError> {
        tracing::debug!(
            token_id = %token.id,
            element = %element.id(),
            kind = element.kind(),
            "executing element"
        );
        match element {
            Element::StartEvent { .. } => self.execute_start_event(token, definition, element),
            Element::EndEvent { .. } => self.execute_end_event(token, instance, element).await,
            Element::ServiceTask { .. } => {
                self.execute_service_task(token, instance, definition, element).await
            }
            Element::ScriptTask { .. } => self.execute_script_task(token, instance, definition, element),
            Element::ExclusiveGateway { .. } => {
                self.execute_exclusive_gateway(token, instance, definition, element)
            }
            Element::ParallelGateway { .. } => {
                self.execute_parallel_gateway(token, instance, definition, element, spawned)
            }
            Element::InclusiveGateway { .. } => {
                self.execute_inclusive_gateway(token, instance, definition, element, spawned)
            }
            Element::EventBasedGateway { .. } => {
                self.execute_event_based_gateway(token, instance, definition, element).await
            }
            Element::IntermediateCatchEvent { .. } => {
                self.execute_intermediate_catch(token, instance, definition, element).await
            }
            Element::BoundaryEvent { .. } => {
                // Boundary events are armed when their activity starts and
                // entered only through timer/error routing, never by a
                // token walking onto them.
                Err(EngineError::Bpmn(format!(
                    "token {} walked onto boundary event {}",
                    token.id,
                    element.id()
                )))
            }
            Element::CallActivity { .. } => {
                self.execute_call_activity(token, instance, element, spawned).await
            }
            Element::SubProcess { .. } => {
                self.execute_subprocess(token, instance, definition, element, spawned)
            }
        }
    }
}

#[cfg(test)]
#[path = "executors_tests.rs"]
mod tests;
