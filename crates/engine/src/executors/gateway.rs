// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gateway executors: exclusive, parallel, inclusive, event-based.

use super::ExecutionResult;
use crate::engine::{RaceArm, TokenEngine};
use crate::error::EngineError;
use flow_core::{
    Clock, Element, EventTrigger, GatewaySyncState, ProcessDefinition, ProcessInstance, TimerType,
    Token, TokenId, WaitReason,
};
use flow_store::keys;

impl<C: Clock> TokenEngine<C> {
    /// Exclusive: first truthy condition in document order, else default.
    pub(crate) fn execute_exclusive_gateway(
        &self,
        token: &mut Token,
        instance: &ProcessInstance,
        definition: &ProcessDefinition,
        element: &Element,
    ) -> Result<ExecutionResult, EngineError> {
        let Element::ExclusiveGateway { id, default_flow, .. } = element else {
            return Err(EngineError::Bpmn(format!("{} is not an exclusive gateway", element.id())));
        };
        let vars = self.scope_vars(instance, token);
        for flow in definition.outgoing(id) {
            let taken = match &flow.condition {
                Some(condition) => self.expression.evaluate_bool(condition, &vars)?,
                // An unconditional flow that is not the default wins
                // immediately in document order.
                None => Some(flow.id.as_str()) != default_flow.as_deref(),
            };
            if taken {
                return Ok(ExecutionResult::advance(vec![flow.target_ref.clone()]));
            }
        }
        if let Some(default_id) = default_flow {
            if let Some(flow) = definition.outgoing(id).into_iter().find(|f| &f.id == default_id) {
                return Ok(ExecutionResult::advance(vec![flow.target_ref.clone()]));
            }
        }
        Err(EngineError::Bpmn(format!("exclusive gateway {id} has no outgoing flow to take")))
    }

    /// Parallel gateway: join when multiple flows come in, fork when
    /// multiple go out. A pass-through gateway is both with one each.
    pub(crate) fn execute_parallel_gateway(
        &self,
        token: &mut Token,
        instance: &ProcessInstance,
        definition: &ProcessDefinition,
        element: &Element,
        spawned: &mut Vec<TokenId>,
    ) -> Result<ExecutionResult, EngineError> {
        let id = element.id();
        if definition.incoming(id).len() > 1 {
            let expected = definition.incoming(id).len() as u32;
            return self.join_arrival(token, instance, definition, id, expected, spawned);
        }
        self.fork(token, definition, id, spawned)
    }

    /// Inclusive gateway: fork the truthy subset, join the recorded
    /// active branch set.
    pub(crate) fn execute_inclusive_gateway(
        &self,
        token: &mut Token,
        instance: &ProcessInstance,
        definition: &ProcessDefinition,
        element: &Element,
        spawned: &mut Vec<TokenId>,
    ) -> Result<ExecutionResult, EngineError> {
        let Element::InclusiveGateway { id, default_flow, .. } = element else {
            return Err(EngineError::Bpmn(format!("{} is not an inclusive gateway", element.id())));
        };

        if definition.incoming(id).len() > 1 {
            // Join: the split recorded how many branches went live. When
            // the state is missing (split elsewhere or restarted mid
            // flight) fall back to the full incoming count.
            let expected = self
                .load_gateway_sync(id, instance.id)?
                .map(|s| s.expected)
                .unwrap_or(definition.incoming(id).len() as u32);
            return self.join_arrival(token, instance, definition, id, expected, spawned);
        }

        let vars = self.scope_vars(instance, token);
        let mut taken = Vec::new();
        for flow in definition.outgoing(id) {
            let live = match &flow.condition {
                Some(condition) => self.expression.evaluate_bool(condition, &vars)?,
                None => Some(flow.id.as_str()) != default_flow.as_deref(),
            };
            if live {
                taken.push(flow.target_ref.clone());
            }
        }
        if taken.is_empty() {
            if let Some(default_id) = default_flow {
                if let Some(flow) =
                    definition.outgoing(id).into_iter().find(|f| &f.id == default_id)
                {
                    taken.push(flow.target_ref.clone());
                }
            }
        }
        if taken.is_empty() {
            return Err(EngineError::Bpmn(format!(
                "inclusive gateway {id} activated no branches"
            )));
        }
        if taken.len() == 1 {
            return Ok(ExecutionResult::advance(taken));
        }

        // Record the active branch set at the matching join.
        if let Some(join_id) = find_downstream_join(definition, &taken) {
            let sync = GatewaySyncState::new(
                &join_id,
                instance.id,
                taken.len() as u32,
                self.clock.now_utc(),
            );
            self.store
                .put_json(&keys::gateway_sync(&join_id, instance.id.as_str()), &sync)?;
        }

        let now = self.clock.now_utc();
        for target in taken {
            let branch = token.clone_for_branch(TokenId::fresh(), target, now);
            token.child_ids.push(branch.id);
            self.store.put_json(&keys::token(branch.id.as_str()), &branch)?;
            spawned.push(branch.id);
        }
        Ok(ExecutionResult::completed())
    }

    /// Event-based gateway: arm every outgoing catch event; the first to
    /// fire wins and the engine cancels the rest.
    pub(crate) async fn execute_event_based_gateway(
        &self,
        token: &mut Token,
        instance: &ProcessInstance,
        definition: &ProcessDefinition,
        element: &Element,
    ) -> Result<ExecutionResult, EngineError> {
        let id = element.id();
        let mut arms = Vec::new();
        for flow in definition.outgoing(id) {
            let target = definition.element(&flow.target_ref).ok_or_else(|| {
                EngineError::Bpmn(format!("event gateway {id} flows to missing {}", flow.target_ref))
            })?;
            let Element::IntermediateCatchEvent { id: target_id, trigger, .. } = target else {
                return Err(EngineError::Bpmn(format!(
                    "event gateway {id} must flow to catch events, found {}",
                    target.kind()
                )));
            };
            match trigger {
                EventTrigger::Timer { timer } => {
                    let request = self.timer_request(
                        token,
                        instance,
                        target_id,
                        timer,
                        TimerType::Event,
                        None,
                    )?;
                    let timer_id = self.timers.schedule(request).await?;
                    arms.push(RaceArm {
                        element_id: target_id.clone(),
                        timer_id: Some(timer_id),
                        subscription_id: None,
                    });
                }
                EventTrigger::Message { message_name, correlation_key } => {
                    let subscription_id = self
                        .subscribe_catch(
                            token,
                            instance,
                            target_id,
                            message_name,
                            correlation_key.as_deref(),
                        )
                        .await?;
                    arms.push(RaceArm {
                        element_id: target_id.clone(),
                        timer_id: None,
                        subscription_id: Some(subscription_id),
                    });
                }
                EventTrigger::Signal { signal_name } => {
                    let subscription_id = self
                        .subscribe_catch(token, instance, target_id, signal_name, None)
                        .await?;
                    arms.push(RaceArm {
                        element_id: target_id.clone(),
                        timer_id: None,
                        subscription_id: Some(subscription_id),
                    });
                }
                _ => {
                    return Err(EngineError::Bpmn(format!(
                        "event gateway arm {target_id} has no catchable trigger"
                    )))
                }
            }
        }
        if arms.is_empty() {
            return Err(EngineError::Bpmn(format!("event gateway {id} has no arms")));
        }
        self.register_race(token.id, arms);
        Ok(ExecutionResult::waiting(WaitReason::Gateway(id).to_tag()))
    }

    /// Fork: one branch token per outgoing flow, parent completes.
    pub(crate) fn fork(
        &self,
        token: &mut Token,
        definition: &ProcessDefinition,
        gateway_id: &str,
        spawned: &mut Vec<TokenId>,
    ) -> Result<ExecutionResult, EngineError> {
        let targets: Vec<String> =
            definition.outgoing(gateway_id).iter().map(|f| f.target_ref.clone()).collect();
        match targets.len() {
            0 => Err(EngineError::Bpmn(format!("gateway {gateway_id} has no outgoing flows"))),
            1 => Ok(ExecutionResult::advance(targets)),
            _ => {
                let now = self.clock.now_utc();
                for target in targets {
                    let branch = token.clone_for_branch(TokenId::fresh(), target, now);
                    token.child_ids.push(branch.id);
                    self.store.put_json(&keys::token(branch.id.as_str()), &branch)?;
                    spawned.push(branch.id);
                }
                Ok(ExecutionResult::completed())
            }
        }
    }

    /// One token arrives at a join. Duplicate arrivals are absorbed; the
    /// k-th distinct arrival deletes the sync state and spawns a single
    /// successor carrying the merged branch variables.
    fn join_arrival(
        &self,
        token: &mut Token,
        instance: &ProcessInstance,
        definition: &ProcessDefinition,
        gateway_id: &str,
        expected: u32,
        spawned: &mut Vec<TokenId>,
    ) -> Result<ExecutionResult, EngineError> {
        let now = self.clock.now_utc();
        let mut sync = self
            .load_gateway_sync(gateway_id, instance.id)?
            .unwrap_or_else(|| GatewaySyncState::new(gateway_id, instance.id, expected, now));

        if !sync.record_arrival(token.id.as_str()) {
            tracing::debug!(token_id = %token.id, gateway = gateway_id, "duplicate join arrival ignored");
            return Ok(ExecutionResult::completed());
        }

        let sync_key = keys::gateway_sync(gateway_id, instance.id.as_str());
        if !sync.is_complete() {
            self.store.put_json(&sync_key, &sync)?;
            return Ok(ExecutionResult::completed());
        }

        // Merge branch variables in arrival order, last write wins. The
        // arriving token is not yet persisted in its final state, so its
        // variables are taken from memory.
        let mut merged = flow_core::Variables::new();
        for arrived_id in &sync.arrived {
            if arrived_id == token.id.as_str() {
                flow_core::merge_variables(&mut merged, &token.variables);
            } else if let Some(branch) =
                self.store.try_get_json::<Token>(&keys::token(arrived_id))?
            {
                flow_core::merge_variables(&mut merged, &branch.variables);
            }
        }

        // Delete the sync state and spawn the successor atomically so a
        // crash cannot leave the join half-finished.
        let targets: Vec<String> =
            definition.outgoing(gateway_id).iter().map(|f| f.target_ref.clone()).collect();
        let mut ops = vec![flow_store::BatchOp::delete(sync_key)];
        for target in targets {
            let mut successor = Token::new(TokenId::fresh(), instance.id, target, now);
            successor.previous_element_id = Some(gateway_id.to_string());
            successor.variables = merged.clone();
            successor.subprocess_id = token.subprocess_id.clone();
            ops.push(flow_store::BatchOp::put_json(
                keys::token(successor.id.as_str()),
                &successor,
            )?);
            spawned.push(successor.id);
        }
        self.store.batch(ops)?;
        tracing::debug!(gateway = gateway_id, arrivals = sync.arrived.len(), "join complete");
        Ok(ExecutionResult::completed())
    }

    fn load_gateway_sync(
        &self,
        gateway_id: &str,
        instance_id: flow_core::InstanceId,
    ) -> Result<Option<GatewaySyncState>, EngineError> {
        Ok(self
            .store
            .try_get_json(&keys::gateway_sync(gateway_id, instance_id.as_str()))?)
    }
}

/// Walk forward from the taken branches looking for the joining inclusive
/// gateway (more than one incoming flow). Bounded by visited-set to stay
/// safe on cyclic graphs.
fn find_downstream_join(definition: &ProcessDefinition, targets: &[String]) -> Option<String> {
    let mut frontier: Vec<String> = targets.to_vec();
    let mut visited = std::collections::HashSet::new();
    while let Some(current) = frontier.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }
        match definition.element(&current) {
            Some(Element::InclusiveGateway { id, .. })
                if definition.incoming(id).len() > 1 =>
            {
                return Some(id.clone());
            }
            Some(element) => {
                for flow in definition.outgoing(element.id()) {
                    frontier.push(flow.target_ref.clone());
                }
            }
            None => {}
        }
    }
    None
}
