// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for engine tests: recording port fakes and a fully
//! wired engine over a temp store.

use crate::definitions::DefinitionStore;
use crate::engine::TokenEngine;
use crate::error::EngineError;
use crate::expression::SimpleEval;
use crate::jobs::JobRegistry;
use crate::ports::{MessagePort, TimerPort};
use async_trait::async_trait;
use flow_core::{
    Element, EventTrigger, FakeClock, ProcessDefinition, ProcessMessageSubscription, SequenceFlow,
    SubscriptionId, TaskDefinition, TimerId, Variables,
};
use flow_store::{Store, StoreConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Recording TimerPort: schedules succeed with fresh IDs.
#[derive(Default)]
pub struct FakeTimers {
    pub scheduled: Mutex<Vec<flow_wheel::TimerRequest>>,
    pub scheduled_ids: Mutex<Vec<TimerId>>,
    pub canceled: Mutex<Vec<TimerId>>,
}

#[async_trait]
impl TimerPort for FakeTimers {
    async fn schedule(
        &self,
        request: flow_wheel::TimerRequest,
    ) -> Result<TimerId, EngineError> {
        let id = TimerId::fresh();
        self.scheduled.lock().push(request);
        self.scheduled_ids.lock().push(id);
        Ok(id)
    }

    async fn cancel(&self, timer_id: TimerId) -> Result<(), EngineError> {
        self.canceled.lock().push(timer_id);
        Ok(())
    }
}

/// Recording MessagePort.
#[derive(Default)]
pub struct FakeMessages {
    pub subscriptions: Mutex<Vec<ProcessMessageSubscription>>,
    pub deleted: Mutex<Vec<SubscriptionId>>,
    pub published: Mutex<Vec<(String, Option<String>, Variables)>>,
}

#[async_trait]
impl MessagePort for FakeMessages {
    async fn create_subscription(
        &self,
        subscription: ProcessMessageSubscription,
    ) -> Result<(), EngineError> {
        self.subscriptions.lock().push(subscription);
        Ok(())
    }

    async fn delete_subscription(&self, id: SubscriptionId) -> Result<(), EngineError> {
        self.deleted.lock().push(id);
        Ok(())
    }

    async fn publish(
        &self,
        name: String,
        correlation_key: Option<String>,
        variables: Variables,
    ) -> Result<(), EngineError> {
        self.published.lock().push((name, correlation_key, variables));
        Ok(())
    }
}

pub struct EngineFixture {
    pub _dir: tempfile::TempDir,
    pub store: Store,
    pub clock: FakeClock,
    pub engine: Arc<TokenEngine<FakeClock>>,
    pub timers: Arc<FakeTimers>,
    pub messages: Arc<FakeMessages>,
}

pub fn engine_fixture() -> EngineFixture {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::new(dir.path().join("db"));
    config.flush_every_ms = None;
    let store = Store::open(&config).unwrap();
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_700_000_000_000);

    let timers = Arc::new(FakeTimers::default());
    let messages = Arc::new(FakeMessages::default());
    let engine = Arc::new(TokenEngine::new(
        store.clone(),
        DefinitionStore::new(store.clone()),
        Arc::new(SimpleEval),
        JobRegistry::new(store.clone(), clock.clone()),
        Arc::clone(&timers) as Arc<dyn TimerPort>,
        Arc::clone(&messages) as Arc<dyn MessagePort>,
        clock.clone(),
    ));
    EngineFixture { _dir: dir, store, clock, engine, timers, messages }
}

// --- definition builders ---

pub fn start(id: &str) -> Element {
    Element::StartEvent { id: id.into(), name: None, trigger: EventTrigger::None }
}

pub fn end(id: &str) -> Element {
    Element::EndEvent { id: id.into(), name: None, trigger: EventTrigger::None }
}

pub fn service_task(id: &str, job_type: &str, retries: u32) -> Element {
    Element::ServiceTask {
        id: id.into(),
        name: None,
        task: TaskDefinition { task_type: job_type.into(), retries },
        headers: HashMap::new(),
    }
}

pub fn flow(id: &str, from: &str, to: &str) -> SequenceFlow {
    SequenceFlow { id: id.into(), source_ref: from.into(), target_ref: to.into(), condition: None }
}

pub fn cond_flow(id: &str, from: &str, to: &str, condition: &str) -> SequenceFlow {
    SequenceFlow {
        id: id.into(),
        source_ref: from.into(),
        target_ref: to.into(),
        condition: Some(condition.into()),
    }
}

pub fn definition(
    process_key: &str,
    elements: Vec<Element>,
    flows: Vec<SequenceFlow>,
) -> ProcessDefinition {
    ProcessDefinition { process_key: process_key.into(), name: None, version: 0, elements, flows }
}

/// `start → serviceTask(work) → end`
pub fn linear_service_definition(process_key: &str) -> ProcessDefinition {
    definition(
        process_key,
        vec![start("s"), service_task("t1", "work", 3), end("e")],
        vec![flow("f1", "s", "t1"), flow("f2", "t1", "e")],
    )
}
