// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The token engine.
//!
//! Executes process graphs one element at a time per token. Within a
//! token, steps are strictly sequential (a keyed mutex serialises every
//! path that touches a token); across tokens of one instance execution is
//! free to interleave. The engine reaches the wheel and the correlator
//! only through its capability ports, and is reached back through the
//! callback traits the kernel routes responses into.

use crate::definitions::DefinitionStore;
use crate::error::EngineError;
use crate::expression::ExpressionEval;
use crate::jobs::{JobFailureOutcome, JobRegistry};
use crate::locks::KeyedLocks;
use crate::messages::{CorrelationEvent, CorrelationTarget};
use crate::ports::{MessagePort, TimerPort};
use async_trait::async_trait;
use flow_core::{
    merge_variables, Clock, Element, EventTrigger, Incident, IncidentKind, InstanceId,
    InstanceState, Job, ProcessContext, ProcessDefinition, ProcessInstance, SubscriptionId,
    TimerId, TimerSpec, TimerType, Token, TokenId, TokenState, Variables, WaitReason,
    TOKEN_ID_VAR,
};
use flow_store::{keys, Store};
use flow_wheel::{TimerFired, TimerRequest};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// One armed branch of an event-based gateway race.
pub(crate) struct RaceArm {
    pub element_id: String,
    pub timer_id: Option<TimerId>,
    pub subscription_id: Option<SubscriptionId>,
}

/// Error boundary registered while its activity runs.
#[derive(Debug, Clone)]
pub struct ErrorBoundarySubscription {
    pub token_id: TokenId,
    pub event_id: String,
    pub error_code: String,
    pub error_name: Option<String>,
    pub cancel_activity: bool,
    pub outgoing_flows: Vec<String>,
}

pub struct TokenEngine<C: Clock> {
    pub(crate) store: Store,
    pub(crate) definitions: DefinitionStore,
    pub(crate) expression: Arc<dyn ExpressionEval>,
    pub(crate) jobs: JobRegistry<C>,
    pub(crate) timers: Arc<dyn TimerPort>,
    pub(crate) messages: Arc<dyn MessagePort>,
    pub(crate) clock: C,
    locks: KeyedLocks,
    races: Mutex<HashMap<String, Vec<RaceArm>>>,
    error_subs: Mutex<HashMap<String, Vec<ErrorBoundarySubscription>>>,
}

impl<C: Clock> TokenEngine<C> {
    pub fn new(
        store: Store,
        definitions: DefinitionStore,
        expression: Arc<dyn ExpressionEval>,
        jobs: JobRegistry<C>,
        timers: Arc<dyn TimerPort>,
        messages: Arc<dyn MessagePort>,
        clock: C,
    ) -> Self {
        Self {
            store,
            definitions,
            expression,
            jobs,
            timers,
            messages,
            clock,
            locks: KeyedLocks::new(),
            races: Mutex::new(HashMap::new()),
            error_subs: Mutex::new(HashMap::new()),
        }
    }

    pub fn definitions(&self) -> &DefinitionStore {
        &self.definitions
    }

    pub fn jobs(&self) -> &JobRegistry<C> {
        &self.jobs
    }

    pub fn instance(&self, id: InstanceId) -> Result<ProcessInstance, EngineError> {
        self.load_instance(id)
    }

    pub fn token(&self, id: TokenId) -> Result<Token, EngineError> {
        self.store
            .try_get_json(&keys::token(id.as_str()))?
            .ok_or_else(|| EngineError::NotFound(format!("token: {id}")))
    }

    /// All tokens belonging to an instance (prefix scan + filter).
    pub fn tokens_of(&self, instance_id: InstanceId) -> Result<Vec<Token>, EngineError> {
        Ok(self
            .store
            .scan_json::<Token>(keys::TOKEN_PREFIX)?
            .into_iter()
            .filter(|t| t.process_instance_id == instance_id)
            .collect())
    }

    // --- instance lifecycle ---

    /// Start an enactment of the latest version of a process.
    ///
    /// A message start event creates no token: the instance parks in the
    /// MESSAGES state behind a permanent subscription.
    pub async fn start_instance(
        &self,
        process_key: &str,
        variables: Variables,
    ) -> Result<InstanceId, EngineError> {
        let definition = self.definitions.latest(process_key)?;
        let start = definition.start_event().ok_or_else(|| {
            EngineError::Bpmn(format!("process {process_key} has no unique start event"))
        })?;
        let now = self.clock.now_utc();

        if let Element::StartEvent {
            id,
            trigger: EventTrigger::Message { message_name, correlation_key },
            ..
        } = start
        {
            let mut instance = ProcessInstance::new(
                InstanceId::fresh(),
                process_key,
                definition.version,
                variables,
                now,
            );
            instance.transition(InstanceState::Messages, now);
            self.store.put_json(&keys::instance(instance.id.as_str()), &instance)?;

            let subscription = flow_core::ProcessMessageSubscription {
                id: SubscriptionId::fresh(),
                message_name: message_name.clone(),
                correlation_key: correlation_key.clone(),
                process_key: process_key.to_string(),
                start_event_id: id.clone(),
                permanent: true,
                created_at: now,
            };
            self.messages.create_subscription(subscription).await?;
            tracing::info!(instance_id = %instance.id, process_key, "message-start instance parked");
            return Ok(instance.id);
        }

        let instance = ProcessInstance::new(
            InstanceId::fresh(),
            process_key,
            definition.version,
            variables,
            now,
        );
        let token = Token::new(TokenId::fresh(), instance.id, start.id(), now);
        self.store.put_json(&keys::instance(instance.id.as_str()), &instance)?;
        self.store.put_json(&keys::token(token.id.as_str()), &token)?;
        tracing::info!(instance_id = %instance.id, process_key, "instance started");

        let instance_id = instance.id;
        self.execute_token(token.id).await?;
        Ok(instance_id)
    }

    /// Start an instance for a correlated message start event. The
    /// instance ID was minted by the correlator so the audit record and
    /// the instance agree.
    pub async fn start_instance_from_message(
        &self,
        process_key: &str,
        start_event_id: &str,
        instance_id: InstanceId,
        variables: Variables,
    ) -> Result<(), EngineError> {
        let definition = self.definitions.latest(process_key)?;
        if definition.element(start_event_id).is_none() {
            return Err(EngineError::Bpmn(format!(
                "start event {start_event_id} not in process {process_key}"
            )));
        }
        let now = self.clock.now_utc();
        let instance =
            ProcessInstance::new(instance_id, process_key, definition.version, variables, now);
        let token = Token::new(TokenId::fresh(), instance.id, start_event_id, now);
        self.store.put_json(&keys::instance(instance.id.as_str()), &instance)?;
        self.store.put_json(&keys::token(token.id.as_str()), &token)?;
        tracing::info!(%instance_id, process_key, "instance started by message");
        self.execute_token(token.id).await
    }

    /// Cancel an instance and every non-terminal token it owns.
    pub async fn cancel_instance(&self, instance_id: InstanceId) -> Result<(), EngineError> {
        let mut instance = self.load_instance(instance_id)?;
        if instance.is_terminal() {
            return Ok(());
        }
        let now = self.clock.now_utc();
        // Terminal state first: any token mid-execution observes it on its
        // next step and parks itself.
        instance.transition(InstanceState::Canceled, now);
        self.store.put_json(&keys::instance(instance_id.as_str()), &instance)?;

        for mut token in self.tokens_of(instance_id)? {
            if token.is_terminal() {
                continue;
            }
            if let Err(e) = self.cancel_activity_artifacts(&mut token).await {
                tracing::warn!(token_id = %token.id, error = %e, "artifact cleanup failed during cancel");
            }
            token.cancel(now);
            self.store.put_json(&keys::token(token.id.as_str()), &token)?;
        }
        tracing::info!(%instance_id, "instance cancelled");
        Ok(())
    }

    // --- token stepping ---

    /// Run a token (and everything it spawns) to a resting state.
    pub async fn execute_token(&self, token_id: TokenId) -> Result<(), EngineError> {
        let mut pending = vec![token_id];
        while let Some(id) = pending.pop() {
            let spawned = self.run_token(id).await?;
            pending.extend(spawned);
        }
        Ok(())
    }

    /// Step one token until it waits, completes, or fails. Returns tokens
    /// that must run next (forked branches, resumed parents).
    async fn run_token(&self, token_id: TokenId) -> Result<Vec<TokenId>, EngineError> {
        let _guard = self.locks.acquire(token_id.as_str()).await;
        let mut spawned = Vec::new();

        loop {
            let now = self.clock.now_utc();
            let Some(mut token) =
                self.store.try_get_json::<Token>(&keys::token(token_id.as_str()))?
            else {
                tracing::warn!(%token_id, "token vanished before execution");
                return Ok(spawned);
            };
            if token.state != TokenState::Active {
                return Ok(spawned);
            }

            let Ok(mut instance) = self.load_instance(token.process_instance_id) else {
                token.cancel(now);
                self.store.put_json(&keys::token(token_id.as_str()), &token)?;
                return Ok(spawned);
            };
            if instance.is_terminal() {
                token.cancel(now);
                self.store.put_json(&keys::token(token_id.as_str()), &token)?;
                return Ok(spawned);
            }

            let definition =
                self.definitions.by_version(&instance.process_key, instance.version)?;
            let Some(element) = definition.element(&token.current_element_id).cloned() else {
                let message =
                    format!("element {} not found in process graph", token.current_element_id);
                self.fail_token(&mut token, &mut instance, IncidentKind::Bpmn, message)
                    .await?;
                return Ok(spawned);
            };

            let result = match self
                .execute_element(&mut token, &instance, &definition, &element, &mut spawned)
                .await
            {
                Ok(result) => result,
                // Transient storage errors bubble up for retry.
                Err(EngineError::Store(e)) => return Err(EngineError::Store(e)),
                Err(e) => {
                    let kind = match &e {
                        EngineError::Expression(_) => IncidentKind::Expression,
                        _ => IncidentKind::Bpmn,
                    };
                    self.fail_token(&mut token, &mut instance, kind, e.to_string()).await?;
                    return Ok(spawned);
                }
            };

            if let Some(code) = result.error {
                let handled = self
                    .raise_bpmn_error(&mut token, &instance, &definition, &code)
                    .await?;
                spawned.extend(handled);
                return Ok(spawned);
            }
            if let Some(tag) = result.waiting_for {
                token.state = TokenState::Waiting;
                token.waiting_for = Some(tag);
                token.updated_at = now;
                self.store.put_json(&keys::token(token_id.as_str()), &token)?;
                return Ok(spawned);
            }
            if result.completed {
                token.complete(now);
                self.store.put_json(&keys::token(token_id.as_str()), &token)?;
                let resumed = self.finish_completed_token(&token, &definition).await?;
                spawned.extend(resumed);
                return Ok(spawned);
            }

            match result.next_elements.len() {
                0 => {
                    token.complete(now);
                    self.store.put_json(&keys::token(token_id.as_str()), &token)?;
                    let resumed = self.finish_completed_token(&token, &definition).await?;
                    spawned.extend(resumed);
                    return Ok(spawned);
                }
                1 => {
                    let next = result.next_elements.into_iter().next().unwrap_or_default();
                    token.advance_to(next, now);
                    self.store.put_json(&keys::token(token_id.as_str()), &token)?;
                }
                _ => {
                    // Implicit fork (e.g. a start event with several
                    // outgoing flows).
                    for target in result.next_elements {
                        let branch = token.clone_for_branch(TokenId::fresh(), target, now);
                        token.child_ids.push(branch.id);
                        self.store.put_json(&keys::token(branch.id.as_str()), &branch)?;
                        spawned.push(branch.id);
                    }
                    token.complete(now);
                    self.store.put_json(&keys::token(token_id.as_str()), &token)?;
                    return Ok(spawned);
                }
            }
        }
    }

    /// A token reached a terminal COMPLETED state: promote variables at
    /// end events, resume waiting parents, and complete quiescent
    /// instances.
    async fn finish_completed_token(
        &self,
        token: &Token,
        definition: &ProcessDefinition,
    ) -> Result<Vec<TokenId>, EngineError> {
        let now = self.clock.now_utc();
        let mut resumed = Vec::new();
        let Ok(mut instance) = self.load_instance(token.process_instance_id) else {
            return Ok(resumed);
        };
        if instance.is_terminal() {
            return Ok(resumed);
        }

        let at_end_event = matches!(
            definition.element(&token.current_element_id),
            Some(Element::EndEvent { .. })
        );

        // End of an embedded subprocess branch: hand control back to the
        // parent token waiting on this child.
        if at_end_event {
            if let (Some(subprocess_id), Some(parent_id)) =
                (token.subprocess_id.clone(), token.parent_id)
            {
                let inner_scope = definition
                    .enclosing_scopes(&token.current_element_id)
                    .first()
                    .map(|s| s.to_string());
                if inner_scope.as_deref() == Some(subprocess_id.as_str()) {
                    let tag = WaitReason::Child(token.id.as_str()).to_tag();
                    resumed.extend(
                        self.resume_waiting_parent(parent_id, &tag, &token.variables).await?,
                    );
                    return Ok(resumed);
                }
            }
            merge_variables(&mut instance.variables, &token.variables);
        }

        let open = self
            .tokens_of(instance.id)?
            .into_iter()
            .filter(|t| t.id != token.id && !t.is_terminal())
            .count();
        if open == 0 && instance.state == InstanceState::Active {
            instance.transition(InstanceState::Completed, now);
            self.store.put_json(&keys::instance(instance.id.as_str()), &instance)?;
            tracing::info!(instance_id = %instance.id, "instance completed");

            // A call activity parent waits on this whole instance.
            if let Some(parent_token_id) = instance.parent_token_id {
                let tag = WaitReason::Child(instance.id.as_str()).to_tag();
                resumed.extend(
                    self.resume_waiting_parent(parent_token_id, &tag, &instance.variables)
                        .await?,
                );
            }
        } else {
            instance.updated_at = now;
            self.store.put_json(&keys::instance(instance.id.as_str()), &instance)?;
        }
        Ok(resumed)
    }

    /// Wake a parent token waiting on the given child tag, merging the
    /// child's variables and stepping past the awaited element.
    ///
    /// Boxed because completion can chain upward through several waiting
    /// ancestors (subprocess inside call activity inside subprocess).
    fn resume_waiting_parent<'a>(
        &'a self,
        parent_id: TokenId,
        expected_tag: &'a str,
        child_variables: &'a Variables,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<TokenId>, EngineError>> + Send + 'a>,
    > {
        Box::pin(async move {
            let _guard = self.locks.acquire(parent_id.as_str()).await;
            let mut spawned = Vec::new();
            let Some(mut parent) =
                self.store.try_get_json::<Token>(&keys::token(parent_id.as_str()))?
            else {
                tracing::warn!(%parent_id, "parent token vanished");
                return Ok(spawned);
            };
            if parent.waiting_for.as_deref() != Some(expected_tag) {
                tracing::debug!(%parent_id, expected_tag, "parent no longer waiting on child");
                return Ok(spawned);
            }

            let now = self.clock.now_utc();
            for (key, value) in child_variables {
                if key != TOKEN_ID_VAR {
                    parent.variables.insert(key.clone(), value.clone());
                }
            }
            parent.clear_waiting(now);

            let instance = self.load_instance(parent.process_instance_id)?;
            let definition =
                self.definitions.by_version(&instance.process_key, instance.version)?;
            let awaited = parent.current_element_id.clone();
            self.step_past_element(&mut parent, &definition, &awaited, &mut spawned).await?;
            Ok(spawned)
        })
    }

    /// Move a token through the outgoing flows of `element_id` without
    /// re-executing the element itself (it has been satisfied).
    pub(crate) async fn step_past_element(
        &self,
        token: &mut Token,
        definition: &ProcessDefinition,
        element_id: &str,
        spawned: &mut Vec<TokenId>,
    ) -> Result<(), EngineError> {
        let now = self.clock.now_utc();
        let next = self.take_flows(definition, token, element_id, None)?;
        match next.len() {
            0 => {
                token.complete(now);
                self.store.put_json(&keys::token(token.id.as_str()), &token)?;
                let resumed = self.finish_completed_token(token, definition).await?;
                spawned.extend(resumed);
            }
            1 => {
                let target = next.into_iter().next().unwrap_or_default();
                token.advance_to(target, now);
                self.store.put_json(&keys::token(token.id.as_str()), &token)?;
                spawned.push(token.id);
            }
            _ => {
                for target in next {
                    let branch = token.clone_for_branch(TokenId::fresh(), target, now);
                    token.child_ids.push(branch.id);
                    self.store.put_json(&keys::token(branch.id.as_str()), &branch)?;
                    spawned.push(branch.id);
                }
                token.complete(now);
                self.store.put_json(&keys::token(token.id.as_str()), &token)?;
            }
        }
        Ok(())
    }

    // --- callbacks ---

    /// A worker completed a job: merge result variables into the owning
    /// token, tear down boundary arming, and advance. A vanished or
    /// non-waiting token is a no-op.
    pub async fn on_job_completed(&self, job: &Job) -> Result<(), EngineError> {
        let expected_tag = WaitReason::Job(job.id.as_str()).to_tag();
        let mut spawned = Vec::new();
        {
            let _guard = self.locks.acquire(job.token_id.as_str()).await;
            let Some(mut token) =
                self.store.try_get_json::<Token>(&keys::token(job.token_id.as_str()))?
            else {
                tracing::info!(job_id = %job.id, "token gone, job completion is a no-op");
                return Ok(());
            };
            if token.is_terminal() || token.waiting_for.as_deref() != Some(expected_tag.as_str()) {
                tracing::info!(job_id = %job.id, token_id = %token.id, "stale job completion ignored");
                return Ok(());
            }

            let now = self.clock.now_utc();
            for (key, value) in &job.variables {
                if key != TOKEN_ID_VAR {
                    token.variables.insert(key.clone(), value.clone());
                }
            }
            self.cancel_activity_artifacts(&mut token).await?;
            token.clear_waiting(now);

            let instance = self.load_instance(token.process_instance_id)?;
            let definition =
                self.definitions.by_version(&instance.process_key, instance.version)?;
            let element_id = token.current_element_id.clone();
            self.step_past_element(&mut token, &definition, &element_id, &mut spawned).await?;
        }
        for id in spawned {
            self.execute_token(id).await?;
        }
        Ok(())
    }

    /// A worker failed a job. While retries remain nothing moves (the job
    /// is deferred); once exhausted the token fails and the instance goes
    /// down with it.
    pub async fn on_job_failed(&self, outcome: &JobFailureOutcome) -> Result<(), EngineError> {
        if !outcome.exhausted {
            return Ok(());
        }
        let job = &outcome.job;
        let _guard = self.locks.acquire(job.token_id.as_str()).await;
        let Some(mut token) =
            self.store.try_get_json::<Token>(&keys::token(job.token_id.as_str()))?
        else {
            return Ok(());
        };
        if token.is_terminal() {
            return Ok(());
        }
        let Ok(mut instance) = self.load_instance(token.process_instance_id) else {
            return Ok(());
        };
        self.cancel_activity_artifacts(&mut token).await?;
        // The registry already opened the JOB incident; here the token and
        // instance are failed.
        let now = self.clock.now_utc();
        token.fail(now);
        self.store.put_json(&keys::token(token.id.as_str()), &token)?;
        self.fail_instance(&mut instance, Some(token.id)).await?;
        Ok(())
    }

    /// A timer fired. Routing depends on the timer type: start timers
    /// begin instances, event timers resume catching tokens or resolve
    /// gateway races, boundary timers interrupt or branch the activity.
    pub async fn on_timer_fired(&self, fired: &TimerFired) -> Result<(), EngineError> {
        match fired.timer_type {
            TimerType::Start => {
                let Some(context) = &fired.process_context else {
                    tracing::warn!(timer_id = %fired.timer_id, "start timer without process context");
                    return Ok(());
                };
                self.start_instance(&context.process_key, fired.variables.clone()).await?;
                Ok(())
            }
            TimerType::Event => self.on_event_timer(fired).await,
            TimerType::Boundary => self.on_boundary_timer(fired).await,
        }
    }

    async fn on_event_timer(&self, fired: &TimerFired) -> Result<(), EngineError> {
        let mut spawned = Vec::new();
        {
            let _guard = self.locks.acquire(fired.token_id.as_str()).await;
            let Some(mut token) =
                self.store.try_get_json::<Token>(&keys::token(fired.token_id.as_str()))?
            else {
                return Ok(());
            };
            let now = self.clock.now_utc();
            let waiting = token.waiting_for.clone();
            match waiting.as_deref().and_then(WaitReason::parse) {
                Some(WaitReason::Timer(timer_id)) if timer_id == fired.timer_id.as_str() => {
                    token.clear_waiting(now);
                    let instance = self.load_instance(token.process_instance_id)?;
                    let definition =
                        self.definitions.by_version(&instance.process_key, instance.version)?;
                    self.step_past_element(&mut token, &definition, &fired.element_id, &mut spawned)
                        .await?;
                }
                Some(WaitReason::Gateway(_)) => {
                    self.resolve_race(&mut token, &fired.element_id, &mut spawned).await?;
                }
                _ => {
                    tracing::debug!(timer_id = %fired.timer_id, "stale event timer ignored");
                    return Ok(());
                }
            }
        }
        for id in spawned {
            self.execute_token(id).await?;
        }
        Ok(())
    }

    async fn on_boundary_timer(&self, fired: &TimerFired) -> Result<(), EngineError> {
        let Some(context) = fired.process_context.clone() else {
            tracing::warn!(timer_id = %fired.timer_id, "boundary timer without process context");
            return Ok(());
        };
        let mut spawned = Vec::new();
        {
            let _guard = self.locks.acquire(fired.token_id.as_str()).await;
            let Some(mut token) =
                self.store.try_get_json::<Token>(&keys::token(fired.token_id.as_str()))?
            else {
                return Ok(());
            };
            if token.is_terminal()
                || context.attached_to_ref.as_deref() != Some(token.current_element_id.as_str())
            {
                tracing::debug!(timer_id = %fired.timer_id, "boundary timer for finished activity ignored");
                return Ok(());
            }

            let instance = self.load_instance(token.process_instance_id)?;
            let definition =
                self.definitions.by_version(&instance.process_key, instance.version)?;
            let now = self.clock.now_utc();

            if context.cancel_activity {
                // Interrupting: the activity is over. Cancel its job and
                // remaining boundary timers, then leave via the boundary
                // event's flows.
                self.cancel_activity_artifacts(&mut token).await?;
                token.clear_waiting(now);
                token.advance_to(fired.element_id.clone(), now);
                self.store.put_json(&keys::token(token.id.as_str()), &token)?;
                self.step_past_element(&mut token, &definition, &fired.element_id, &mut spawned)
                    .await?;
            } else {
                // Non-interrupting: branch off, activity keeps running.
                for flow in definition.outgoing(&fired.element_id) {
                    let branch =
                        token.clone_for_branch(TokenId::fresh(), flow.target_ref.clone(), now);
                    token.child_ids.push(branch.id);
                    self.store.put_json(&keys::token(branch.id.as_str()), &branch)?;
                    spawned.push(branch.id);
                }
                self.store.put_json(&keys::token(token.id.as_str()), &token)?;
            }
        }
        for id in spawned {
            self.execute_token(id).await?;
        }
        Ok(())
    }

    /// The correlator dispatched a message to this engine.
    pub async fn on_message_correlated(
        &self,
        event: &CorrelationEvent,
    ) -> Result<(), EngineError> {
        match &event.target {
            CorrelationTarget::StartEvent { process_key, start_event_id, instance_id } => {
                self.start_instance_from_message(
                    process_key,
                    start_event_id,
                    *instance_id,
                    event.variables.clone(),
                )
                .await
            }
            CorrelationTarget::IntermediateCatch { token_id, element_id, .. } => {
                let mut spawned = Vec::new();
                {
                    let _guard = self.locks.acquire(token_id.as_str()).await;
                    let Some(mut token) =
                        self.store.try_get_json::<Token>(&keys::token(token_id.as_str()))?
                    else {
                        tracing::info!(%token_id, "token gone, correlation is a no-op");
                        return Ok(());
                    };
                    let now = self.clock.now_utc();
                    let expected = WaitReason::Message(&event.message_name).to_tag();
                    let waiting = token.waiting_for.clone();
                    match waiting.as_deref().and_then(WaitReason::parse) {
                        Some(WaitReason::Message(_))
                            if waiting.as_deref() == Some(expected.as_str())
                                && token.current_element_id == *element_id =>
                        {
                            // Message payload promotes to the token and the
                            // instance.
                            merge_variables(&mut token.variables, &event.variables);
                            let mut instance = self.load_instance(token.process_instance_id)?;
                            merge_variables(&mut instance.variables, &event.variables);
                            instance.updated_at = now;
                            self.store
                                .put_json(&keys::instance(instance.id.as_str()), &instance)?;

                            token.clear_waiting(now);
                            let definition = self
                                .definitions
                                .by_version(&instance.process_key, instance.version)?;
                            self.step_past_element(&mut token, &definition, element_id, &mut spawned)
                                .await?;
                        }
                        Some(WaitReason::Gateway(_)) => {
                            merge_variables(&mut token.variables, &event.variables);
                            self.resolve_race(&mut token, element_id, &mut spawned).await?;
                        }
                        _ => {
                            tracing::debug!(%token_id, "stale correlation ignored");
                            return Ok(());
                        }
                    }
                }
                for id in spawned {
                    self.execute_token(id).await?;
                }
                Ok(())
            }
        }
    }

    // --- races, boundaries, errors ---

    pub(crate) fn register_race(&self, token_id: TokenId, arms: Vec<RaceArm>) {
        self.races.lock().insert(token_id.as_str().to_string(), arms);
    }

    pub(crate) fn register_error_boundary(&self, subscription: ErrorBoundarySubscription) {
        self.error_subs
            .lock()
            .entry(subscription.token_id.as_str().to_string())
            .or_default()
            .push(subscription);
    }

    /// First arm of an event-based gateway fired: cancel the losers and
    /// continue past the winning catch event.
    async fn resolve_race(
        &self,
        token: &mut Token,
        winning_element_id: &str,
        spawned: &mut Vec<TokenId>,
    ) -> Result<(), EngineError> {
        let arms = {
            let mut races = self.races.lock();
            match races.get(token.id.as_str()) {
                // A fire for an element that is not an arm of the current
                // race is a leftover from an earlier, already-resolved one.
                Some(arms) if !arms.iter().any(|a| a.element_id == winning_element_id) => {
                    tracing::debug!(token_id = %token.id, winning_element_id, "stale race arm ignored");
                    return Ok(());
                }
                Some(_) => races.remove(token.id.as_str()).unwrap_or_default(),
                // No registered arms (e.g. after a restart): resolve best
                // effort, losing arms will surface as stale fires.
                None => Vec::new(),
            }
        };
        for arm in &arms {
            if arm.element_id == winning_element_id {
                continue;
            }
            if let Some(timer_id) = arm.timer_id {
                if let Err(e) = self.timers.cancel(timer_id).await {
                    tracing::warn!(%timer_id, error = %e, "failed to cancel losing race arm");
                }
            }
            if let Some(subscription_id) = arm.subscription_id {
                if let Err(e) = self.messages.delete_subscription(subscription_id).await {
                    tracing::warn!(%subscription_id, error = %e, "failed to delete losing race arm");
                }
            }
        }

        let now = self.clock.now_utc();
        token.clear_waiting(now);
        token.advance_to(winning_element_id.to_string(), now);
        self.store.put_json(&keys::token(token.id.as_str()), &token)?;

        let instance = self.load_instance(token.process_instance_id)?;
        let definition = self.definitions.by_version(&instance.process_key, instance.version)?;
        self.step_past_element(token, &definition, winning_element_id, spawned).await
    }

    /// Cancel everything armed for the token's current activity: the
    /// in-flight job, boundary timers, error boundaries, race arms.
    pub(crate) async fn cancel_activity_artifacts(
        &self,
        token: &mut Token,
    ) -> Result<(), EngineError> {
        if let Some(WaitReason::Job(job_id)) = token.wait_reason() {
            let job_id = flow_core::JobId::from_string(job_id);
            if let Err(e) = self.jobs.cancel(&job_id) {
                if !matches!(e, EngineError::NotFound(_)) {
                    tracing::warn!(%job_id, error = %e, "failed to cancel job");
                }
            }
        }
        for timer_id in std::mem::take(&mut token.boundary_timer_ids) {
            if let Err(e) = self.timers.cancel(timer_id).await {
                tracing::warn!(%timer_id, error = %e, "failed to cancel boundary timer");
            }
        }
        self.error_subs.lock().remove(token.id.as_str());
        let arms = self.races.lock().remove(token.id.as_str());
        if let Some(arms) = arms {
            for arm in arms {
                if let Some(timer_id) = arm.timer_id {
                    let _ = self.timers.cancel(timer_id).await;
                }
                if let Some(subscription_id) = arm.subscription_id {
                    let _ = self.messages.delete_subscription(subscription_id).await;
                }
            }
        }
        Ok(())
    }

    /// Propagate a BPMN error upward: the innermost matching interrupting
    /// boundary wins; with no handler the instance fails.
    pub(crate) async fn raise_bpmn_error(
        &self,
        token: &mut Token,
        instance: &ProcessInstance,
        definition: &ProcessDefinition,
        error_code: &str,
    ) -> Result<Vec<TokenId>, EngineError> {
        let now = self.clock.now_utc();
        let mut spawned = Vec::new();

        // 1. Activity-level error boundary on this token.
        let handler = self
            .error_subs
            .lock()
            .get(token.id.as_str())
            .and_then(|subs| {
                subs.iter()
                    .find(|s| s.error_code == error_code || s.error_code.is_empty())
                    .cloned()
            });
        if let Some(handler) = handler {
            self.inject_error_vars(token, error_code, handler.error_name.as_deref());
            if handler.cancel_activity {
                self.cancel_activity_artifacts(token).await?;
                token.clear_waiting(now);
                match handler.outgoing_flows.len() {
                    0 => {
                        token.complete(now);
                        self.store.put_json(&keys::token(token.id.as_str()), &token)?;
                        spawned.extend(self.finish_completed_token(token, definition).await?);
                    }
                    _ => {
                        let mut targets = handler.outgoing_flows.clone();
                        let first = targets.remove(0);
                        for target in targets {
                            let branch = token.clone_for_branch(TokenId::fresh(), target, now);
                            token.child_ids.push(branch.id);
                            self.store.put_json(&keys::token(branch.id.as_str()), &branch)?;
                            spawned.push(branch.id);
                        }
                        token.advance_to(first, now);
                        self.store.put_json(&keys::token(token.id.as_str()), &token)?;
                        spawned.push(token.id);
                    }
                }
            } else {
                for target in &handler.outgoing_flows {
                    let branch = token.clone_for_branch(TokenId::fresh(), target.clone(), now);
                    token.child_ids.push(branch.id);
                    self.store.put_json(&keys::token(branch.id.as_str()), &branch)?;
                    spawned.push(branch.id);
                }
                self.store.put_json(&keys::token(token.id.as_str()), &token)?;
            }
            tracing::info!(error_code, handler = %handler.event_id, "error caught by boundary");
            return Ok(spawned);
        }

        // 2. Walk enclosing subprocess scopes, innermost first.
        for scope_id in definition.enclosing_scopes(&token.current_element_id) {
            for boundary in definition.boundary_events(scope_id) {
                let Element::BoundaryEvent {
                    id: boundary_id,
                    cancel_activity,
                    trigger: EventTrigger::Error { error_code: handled, error_name },
                    ..
                } = boundary
                else {
                    continue;
                };
                if !handled.is_empty() && handled != error_code {
                    continue;
                }

                if *cancel_activity {
                    // Cancel every open token of the failing scope.
                    for mut scoped in self.tokens_of(instance.id)? {
                        if scoped.subprocess_id.as_deref() == Some(scope_id)
                            && !scoped.is_terminal()
                        {
                            let _ = self.cancel_activity_artifacts(&mut scoped).await;
                            scoped.cancel(now);
                            self.store.put_json(&keys::token(scoped.id.as_str()), &scoped)?;
                        }
                    }
                    token.cancel(now);
                    self.store.put_json(&keys::token(token.id.as_str()), &token)?;

                    // The token parked on the subprocess element resumes
                    // through the boundary event.
                    let parked = self
                        .tokens_of(instance.id)?
                        .into_iter()
                        .find(|t| t.current_element_id == *scope_id && t.is_waiting());
                    if let Some(mut parked) = parked {
                        self.inject_error_vars(&mut parked, error_code, error_name.as_deref());
                        parked.clear_waiting(now);
                        parked.advance_to(boundary_id.clone(), now);
                        self.store.put_json(&keys::token(parked.id.as_str()), &parked)?;
                        self.step_past_element(&mut parked, definition, boundary_id, &mut spawned)
                            .await?;
                    }
                } else {
                    let mut branch = Token::new(
                        TokenId::fresh(),
                        instance.id,
                        boundary_id.clone(),
                        now,
                    );
                    self.inject_error_vars(&mut branch, error_code, error_name.as_deref());
                    self.store.put_json(&keys::token(branch.id.as_str()), &branch)?;
                    self.step_past_element(&mut branch, definition, boundary_id, &mut spawned)
                        .await?;
                    token.complete(now);
                    self.store.put_json(&keys::token(token.id.as_str()), &token)?;
                }
                tracing::info!(error_code, scope = scope_id, "error caught by scope boundary");
                return Ok(spawned);
            }
        }

        // 3. Unhandled: incident, token and instance fail.
        let mut instance = instance.clone();
        self.fail_token(
            token,
            &mut instance,
            IncidentKind::Bpmn,
            format!("unhandled BPMN error {error_code} at {}", token.current_element_id),
        )
        .await?;
        Ok(spawned)
    }

    fn inject_error_vars(&self, token: &mut Token, code: &str, name: Option<&str>) {
        token.variables.insert("errorCode".to_string(), Value::String(code.to_string()));
        if let Some(name) = name {
            token.variables.insert("errorMessage".to_string(), Value::String(name.to_string()));
        }
    }

    /// Record an incident, fail the token, and take the instance down.
    async fn fail_token(
        &self,
        token: &mut Token,
        instance: &mut ProcessInstance,
        kind: IncidentKind,
        message: String,
    ) -> Result<(), EngineError> {
        let now = self.clock.now_utc();
        tracing::error!(token_id = %token.id, instance_id = %instance.id, %message, "token failed");
        let incident = Incident::open(kind, message, now)
            .with_instance(instance.id)
            .with_element(token.current_element_id.clone())
            .with_token(token.id);
        self.store.put_json(&keys::incident(incident.id.as_str()), &incident)?;

        self.cancel_activity_artifacts(token).await?;
        token.fail(now);
        self.store.put_json(&keys::token(token.id.as_str()), &token)?;
        self.fail_instance(instance, Some(token.id)).await
    }

    /// Fail the instance and cancel its remaining open tokens.
    async fn fail_instance(
        &self,
        instance: &mut ProcessInstance,
        failed_token: Option<TokenId>,
    ) -> Result<(), EngineError> {
        let now = self.clock.now_utc();
        // Terminal state first, then the token sweep (see cancel_instance).
        instance.transition(InstanceState::Failed, now);
        self.store.put_json(&keys::instance(instance.id.as_str()), &instance)?;

        for mut open in self.tokens_of(instance.id)? {
            if Some(open.id) == failed_token || open.is_terminal() {
                continue;
            }
            let _ = self.cancel_activity_artifacts(&mut open).await;
            open.cancel(now);
            self.store.put_json(&keys::token(open.id.as_str()), &open)?;
        }
        Ok(())
    }

    // --- shared helpers ---

    pub(crate) fn load_instance(
        &self,
        instance_id: InstanceId,
    ) -> Result<ProcessInstance, EngineError> {
        self.store
            .try_get_json(&keys::instance(instance_id.as_str()))?
            .ok_or_else(|| EngineError::NotFound(format!("instance: {instance_id}")))
    }

    /// Merged variable scope: instance variables shadowed by the token's.
    pub(crate) fn scope_vars(&self, instance: &ProcessInstance, token: &Token) -> Variables {
        let mut vars = instance.variables.clone();
        merge_variables(&mut vars, &token.variables);
        vars
    }

    /// Select outgoing flows: unconditional flows are always taken,
    /// conditional flows when truthy, and the default flow only when no
    /// conditional flow matched.
    pub(crate) fn take_flows(
        &self,
        definition: &ProcessDefinition,
        token: &Token,
        element_id: &str,
        default_flow: Option<&str>,
    ) -> Result<Vec<String>, EngineError> {
        let instance = self.load_instance(token.process_instance_id)?;
        let vars = self.scope_vars(&instance, token);
        let mut taken = Vec::new();
        let mut matched_conditional = false;
        for flow in definition.outgoing(element_id) {
            if Some(flow.id.as_str()) == default_flow {
                continue;
            }
            match &flow.condition {
                None => taken.push(flow.target_ref.clone()),
                Some(condition) => {
                    if self.expression.evaluate_bool(condition, &vars)? {
                        taken.push(flow.target_ref.clone());
                        matched_conditional = true;
                    }
                }
            }
        }
        if taken.is_empty() && !matched_conditional {
            if let Some(default_id) = default_flow {
                if let Some(flow) =
                    definition.outgoing(element_id).into_iter().find(|f| f.id == default_id)
                {
                    taken.push(flow.target_ref.clone());
                }
            }
        }
        Ok(taken)
    }

    /// Resolve a FEEL-capable correlation key expression to its value.
    pub(crate) fn eval_to_key(
        &self,
        expression: &str,
        vars: &Variables,
    ) -> Result<String, EngineError> {
        if !expression.starts_with('=') {
            return Ok(expression.to_string());
        }
        match self.expression.evaluate(expression, vars)? {
            Value::String(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    }

    /// Build a timer request from a timer definition, evaluating any
    /// `=`-prefixed FEEL expressions against the current scope.
    pub(crate) fn timer_request(
        &self,
        token: &Token,
        instance: &ProcessInstance,
        element_id: &str,
        spec: &TimerSpec,
        timer_type: TimerType,
        boundary: Option<(&str, bool)>,
    ) -> Result<TimerRequest, EngineError> {
        let vars = self.scope_vars(instance, token);
        let resolve = |value: &Option<String>| -> Result<Option<String>, EngineError> {
            match value {
                Some(text) if text.starts_with('=') => {
                    Ok(Some(self.eval_to_key(text, &vars)?))
                }
                Some(text) => Ok(Some(text.clone())),
                None => Ok(None),
            }
        };
        Ok(TimerRequest {
            element_id: element_id.to_string(),
            token_id: token.id,
            process_instance_id: instance.id,
            timer_type,
            process_context: Some(ProcessContext {
                process_key: instance.process_key.clone(),
                attached_to_ref: boundary.map(|(activity, _)| activity.to_string()),
                cancel_activity: boundary.map(|(_, cancel)| cancel).unwrap_or(false),
            }),
            time_date: resolve(&spec.time_date)?,
            time_duration: resolve(&spec.time_duration)?,
            time_cycle: resolve(&spec.time_cycle)?,
            base_time: None,
            restore_timer_id: None,
            restore_due_date: None,
            variables: Variables::new(),
        })
    }
}

// --- capability ports implemented by the engine ---

#[async_trait]
impl<C: Clock> crate::ports::ProcessLifecycle for TokenEngine<C> {
    async fn start_instance(
        &self,
        process_key: &str,
        variables: Variables,
    ) -> Result<InstanceId, EngineError> {
        TokenEngine::start_instance(self, process_key, variables).await
    }

    async fn cancel_instance(&self, instance_id: InstanceId) -> Result<(), EngineError> {
        TokenEngine::cancel_instance(self, instance_id).await
    }
}

#[async_trait]
impl<C: Clock> crate::ports::TimerCallback for TokenEngine<C> {
    async fn on_timer_fired(&self, fired: TimerFired) -> Result<(), EngineError> {
        TokenEngine::on_timer_fired(self, &fired).await
    }
}

#[async_trait]
impl<C: Clock> crate::ports::JobCallback for TokenEngine<C> {
    async fn on_job_completed(&self, job: Job) -> Result<(), EngineError> {
        TokenEngine::on_job_completed(self, &job).await
    }

    async fn on_job_failed(&self, outcome: JobFailureOutcome) -> Result<(), EngineError> {
        TokenEngine::on_job_failed(self, &outcome).await
    }
}

#[async_trait]
impl<C: Clock> crate::ports::MessageCallback for TokenEngine<C> {
    async fn on_message_correlated(&self, event: CorrelationEvent) -> Result<(), EngineError> {
        TokenEngine::on_message_correlated(self, &event).await
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
