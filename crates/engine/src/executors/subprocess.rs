// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Call activity and embedded subprocess executors.

use super::ExecutionResult;
use crate::engine::TokenEngine;
use crate::error::EngineError;
use flow_core::{
    Clock, Element, InstanceId, ProcessDefinition, ProcessInstance, Token, TokenId, WaitReason,
};
use flow_store::keys;

impl<C: Clock> TokenEngine<C> {
    /// Call activity: spawn a child instance of the called process; the
    /// parent token waits for its completion.
    pub(crate) async fn execute_call_activity(
        &self,
        token: &mut Token,
        instance: &ProcessInstance,
        element: &Element,
        spawned: &mut Vec<TokenId>,
    ) -> Result<ExecutionResult, EngineError> {
        let Element::CallActivity { id, process_key, .. } = element else {
            return Err(EngineError::Bpmn(format!("{} is not a call activity", element.id())));
        };
        let called = self.definitions.latest(process_key)?;
        let start = called.start_event().ok_or_else(|| {
            EngineError::Bpmn(format!("called process {process_key} has no unique start event"))
        })?;

        let now = self.clock.now_utc();
        let mut child = ProcessInstance::new(
            InstanceId::fresh(),
            process_key,
            called.version,
            self.scope_vars(instance, token),
            now,
        );
        child.parent_token_id = Some(token.id);
        child.metadata.insert("called_from".to_string(), id.clone());
        let root = Token::new(TokenId::fresh(), child.id, start.id(), now);

        self.store.put_json(&keys::instance(child.id.as_str()), &child)?;
        self.store.put_json(&keys::token(root.id.as_str()), &root)?;
        spawned.push(root.id);

        tracing::debug!(parent = %token.id, child_instance = %child.id, process_key, "call activity started");
        Ok(ExecutionResult::waiting(WaitReason::Child(child.id.as_str()).to_tag()))
    }

    /// Embedded subprocess: spawn a scoped child token at the inner start
    /// event; the parent waits on it.
    pub(crate) fn execute_subprocess(
        &self,
        token: &mut Token,
        instance: &ProcessInstance,
        definition: &ProcessDefinition,
        element: &Element,
        spawned: &mut Vec<TokenId>,
    ) -> Result<ExecutionResult, EngineError> {
        let Element::SubProcess { id, .. } = element else {
            return Err(EngineError::Bpmn(format!("{} is not a subprocess", element.id())));
        };
        let start = definition.subprocess_start(id).ok_or_else(|| {
            EngineError::Bpmn(format!("subprocess {id} has no unique start event"))
        })?;

        let now = self.clock.now_utc();
        let mut child = Token::new(TokenId::fresh(), instance.id, start.id(), now);
        child.parent_id = Some(token.id);
        child.subprocess_id = Some(id.clone());
        child.variables = token.variables.clone();
        token.child_ids.push(child.id);

        self.store.put_json(&keys::token(child.id.as_str()), &child)?;
        spawned.push(child.id);

        Ok(ExecutionResult::waiting(WaitReason::Child(child.id.as_str()).to_tag()))
    }
}
