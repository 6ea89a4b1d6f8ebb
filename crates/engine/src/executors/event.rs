// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Start, end, and intermediate catch event executors.

use super::ExecutionResult;
use crate::engine::TokenEngine;
use crate::error::EngineError;
use flow_core::{
    Clock, Element, EventTrigger, ProcessDefinition, ProcessInstance, ProcessMessageSubscription,
    SubscriptionId, TimerType, Token, WaitReason,
};

impl<C: Clock> TokenEngine<C> {
    /// A start event simply emits its outgoing flows. Message start
    /// events never execute here: they are satisfied during instance
    /// creation (subscription registration or message dispatch).
    pub(crate) fn execute_start_event(
        &self,
        token: &mut Token,
        definition: &ProcessDefinition,
        element: &Element,
    ) -> Result<ExecutionResult, EngineError> {
        let next = self.take_flows(definition, token, element.id(), None)?;
        if next.is_empty() {
            return Ok(ExecutionResult::completed());
        }
        Ok(ExecutionResult::advance(next))
    }

    /// End events terminate the token. A `messageEventDefinition`
    /// publishes an outbound message first; an `errorEventDefinition`
    /// raises a BPMN error that propagates to the innermost handler.
    pub(crate) async fn execute_end_event(
        &self,
        token: &mut Token,
        instance: &ProcessInstance,
        element: &Element,
    ) -> Result<ExecutionResult, EngineError> {
        let Element::EndEvent { trigger, .. } = element else {
            return Err(EngineError::Bpmn(format!("{} is not an end event", element.id())));
        };
        match trigger {
            EventTrigger::Message { message_name, correlation_key } => {
                let vars = self.scope_vars(instance, token);
                let key = match correlation_key {
                    Some(expr) => Some(self.eval_to_key(expr, &vars)?),
                    None => None,
                };
                self.messages.publish(message_name.clone(), key, vars).await?;
                Ok(ExecutionResult::completed())
            }
            EventTrigger::Error { error_code, .. } => {
                Ok(ExecutionResult::bpmn_error(error_code.clone()))
            }
            _ => Ok(ExecutionResult::completed()),
        }
    }

    /// Intermediate catch: register interest, park the token.
    pub(crate) async fn execute_intermediate_catch(
        &self,
        token: &mut Token,
        instance: &ProcessInstance,
        _definition: &ProcessDefinition,
        element: &Element,
    ) -> Result<ExecutionResult, EngineError> {
        let Element::IntermediateCatchEvent { id, trigger, .. } = element else {
            return Err(EngineError::Bpmn(format!("{} is not a catch event", element.id())));
        };
        match trigger {
            EventTrigger::Message { message_name, correlation_key } => {
                self.subscribe_catch(token, instance, id, message_name, correlation_key.as_deref())
                    .await?;
                Ok(ExecutionResult::waiting(WaitReason::Message(message_name).to_tag()))
            }
            // Signals are broadcast messages: same registry, no
            // correlation key.
            EventTrigger::Signal { signal_name } => {
                self.subscribe_catch(token, instance, id, signal_name, None).await?;
                Ok(ExecutionResult::waiting(WaitReason::Message(signal_name).to_tag()))
            }
            EventTrigger::Timer { timer } => {
                let request =
                    self.timer_request(token, instance, id, timer, TimerType::Event, None)?;
                let timer_id = self.timers.schedule(request).await?;
                Ok(ExecutionResult::waiting(WaitReason::Timer(timer_id.as_str()).to_tag()))
            }
            _ => Err(EngineError::Bpmn(format!("catch event {id} has no catchable trigger"))),
        }
    }

    pub(crate) async fn subscribe_catch(
        &self,
        token: &Token,
        instance: &ProcessInstance,
        element_id: &str,
        message_name: &str,
        correlation_key: Option<&str>,
    ) -> Result<SubscriptionId, EngineError> {
        let key = match correlation_key {
            Some(expr) => {
                let vars = self.scope_vars(instance, token);
                Some(self.eval_to_key(expr, &vars)?)
            }
            None => None,
        };
        let subscription = ProcessMessageSubscription {
            id: SubscriptionId::fresh(),
            message_name: message_name.to_string(),
            correlation_key: key,
            process_key: instance.process_key.clone(),
            start_event_id: element_id.to_string(),
            permanent: false,
            created_at: self.clock.now_utc(),
        };
        let id = subscription.id;
        self.messages.create_subscription(subscription).await?;
        Ok(id)
    }
}
