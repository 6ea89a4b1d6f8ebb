// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service and script task executors.

use super::ExecutionResult;
use crate::engine::{ErrorBoundarySubscription, TokenEngine};
use crate::error::EngineError;
use flow_core::{
    Clock, Element, EventTrigger, ProcessDefinition, ProcessInstance, TimerType, Token, WaitReason,
};

impl<C: Clock> TokenEngine<C> {
    /// Service task: arm boundary events, create the job, park the token.
    pub(crate) async fn execute_service_task(
        &self,
        token: &mut Token,
        instance: &ProcessInstance,
        definition: &ProcessDefinition,
        element: &Element,
    ) -> Result<ExecutionResult, EngineError> {
        let Element::ServiceTask { id, task, headers, .. } = element else {
            return Err(EngineError::Bpmn(format!("{} is not a service task", element.id())));
        };

        // Boundary events are armed before the job exists so a worker
        // completing instantly cannot race an unarmed boundary.
        for boundary in definition.boundary_events(id) {
            let Element::BoundaryEvent {
                id: boundary_id,
                cancel_activity,
                trigger,
                ..
            } = boundary
            else {
                continue;
            };
            match trigger {
                EventTrigger::Timer { timer } => {
                    let request = self.timer_request(
                        token,
                        instance,
                        boundary_id,
                        timer,
                        TimerType::Boundary,
                        Some((id.as_str(), *cancel_activity)),
                    )?;
                    let timer_id = self.timers.schedule(request).await?;
                    token.boundary_timer_ids.push(timer_id);
                }
                EventTrigger::Error { error_code, error_name } => {
                    self.register_error_boundary(ErrorBoundarySubscription {
                        token_id: token.id,
                        event_id: boundary_id.clone(),
                        error_code: error_code.clone(),
                        error_name: error_name.clone(),
                        cancel_activity: *cancel_activity,
                        outgoing_flows: definition
                            .outgoing(boundary_id)
                            .iter()
                            .map(|f| f.target_ref.clone())
                            .collect(),
                    });
                }
                EventTrigger::Message { message_name, correlation_key } => {
                    self.subscribe_catch(
                        token,
                        instance,
                        boundary_id,
                        message_name,
                        correlation_key.as_deref(),
                    )
                    .await?;
                }
                _ => {
                    tracing::warn!(
                        boundary = %boundary_id,
                        "unsupported boundary trigger ignored"
                    );
                }
            }
        }

        let job_id = self.jobs.create_job(
            &task.task_type,
            instance.id,
            id,
            token.id,
            headers.clone(),
            self.scope_vars(instance, token),
            task.retries,
        )?;
        Ok(ExecutionResult::waiting(WaitReason::Job(job_id.as_str()).to_tag()))
    }

    /// Script task: evaluate inline and move on.
    pub(crate) fn execute_script_task(
        &self,
        token: &mut Token,
        instance: &ProcessInstance,
        definition: &ProcessDefinition,
        element: &Element,
    ) -> Result<ExecutionResult, EngineError> {
        let Element::ScriptTask { id, script, result_variable, .. } = element else {
            return Err(EngineError::Bpmn(format!("{} is not a script task", element.id())));
        };
        let vars = self.scope_vars(instance, token);
        let value = self.expression.evaluate(script, &vars)?;
        if let Some(name) = result_variable {
            token.variables.insert(name.clone(), value);
        }
        let next = self.take_flows(definition, token, id, None)?;
        if next.is_empty() {
            return Ok(ExecutionResult::completed());
        }
        Ok(ExecutionResult::advance(next))
    }
}
