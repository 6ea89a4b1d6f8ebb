// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios exercising the wheel, correlator, job registry,
//! and token engine wired together over one store, driven by a fake
//! clock. Responses are pumped by hand so every test is deterministic.

use async_trait::async_trait;
use flow_core::{
    Clock, CorrelationOutcome, Element, EventTrigger, FakeClock, IncidentKind, InstanceState,
    JobStatus, ProcessDefinition, ProcessMessageSubscription, SequenceFlow, SubscriptionId,
    TaskDefinition, TimerId, TimerSpec, TimerState, TokenState, Variables,
};
use flow_engine::{
    CorrelationEvent, DefinitionStore, EngineError, JobRegistry, MessageCorrelator, MessagePort,
    PublishOutcome, SimpleEval, TimerPort, TokenEngine,
};
use flow_store::{keys, Store, StoreConfig};
use flow_wheel::{TimerFired, TimerRequest, TimerService};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct DirectTimerPort {
    service: Arc<TimerService<FakeClock>>,
}

#[async_trait]
impl TimerPort for DirectTimerPort {
    async fn schedule(&self, request: TimerRequest) -> Result<TimerId, EngineError> {
        Ok(self.service.schedule(&request)?)
    }

    async fn cancel(&self, timer_id: TimerId) -> Result<(), EngineError> {
        Ok(self.service.cancel(&timer_id)?)
    }
}

struct DirectMessagePort {
    correlator: Arc<MessageCorrelator<FakeClock>>,
}

#[async_trait]
impl MessagePort for DirectMessagePort {
    async fn create_subscription(
        &self,
        subscription: ProcessMessageSubscription,
    ) -> Result<(), EngineError> {
        self.correlator.create_subscription(subscription)
    }

    async fn delete_subscription(&self, id: SubscriptionId) -> Result<(), EngineError> {
        self.correlator.delete_subscription(&id)
    }

    async fn publish(
        &self,
        name: String,
        correlation_key: Option<String>,
        variables: Variables,
    ) -> Result<(), EngineError> {
        self.correlator.publish(&name, correlation_key.as_deref(), &variables, None)?;
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    store: Store,
    clock: FakeClock,
    service: Arc<TimerService<FakeClock>>,
    correlator: Arc<MessageCorrelator<FakeClock>>,
    engine: Arc<TokenEngine<FakeClock>>,
    timer_events: mpsc::Receiver<TimerFired>,
    correlation_events: mpsc::Receiver<CorrelationEvent>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::new(dir.path().join("db"));
    config.flush_every_ms = None;
    let store = Store::open(&config).unwrap();
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_700_000_000_000);

    let (timer_tx, timer_rx) = mpsc::channel(256);
    let (corr_tx, corr_rx) = mpsc::channel(256);
    let service = Arc::new(TimerService::new(store.clone(), clock.clone(), timer_tx));
    let definitions = DefinitionStore::new(store.clone());
    let correlator = Arc::new(MessageCorrelator::new(
        store.clone(),
        definitions.clone(),
        clock.clone(),
        corr_tx,
    ));
    let engine = Arc::new(TokenEngine::new(
        store.clone(),
        definitions,
        Arc::new(SimpleEval),
        JobRegistry::new(store.clone(), clock.clone()),
        Arc::new(DirectTimerPort { service: Arc::clone(&service) }),
        Arc::new(DirectMessagePort { correlator: Arc::clone(&correlator) }),
        clock.clone(),
    ));
    Harness {
        _dir: dir,
        store,
        clock,
        service,
        correlator,
        engine,
        timer_events: timer_rx,
        correlation_events: corr_rx,
    }
}

impl Harness {
    /// Deliver every pending component response to the engine, the way
    /// the kernel's router would.
    async fn pump(&mut self) {
        loop {
            let mut delivered = false;
            while let Ok(fired) = self.timer_events.try_recv() {
                self.engine.on_timer_fired(&fired).await.unwrap();
                delivered = true;
            }
            while let Ok(event) = self.correlation_events.try_recv() {
                self.engine.on_message_correlated(&event).await.unwrap();
                delivered = true;
            }
            if !delivered {
                break;
            }
        }
    }

    /// Advance wall-clock time one wheel tick at a time.
    async fn run_secs(&mut self, secs: u64) {
        for _ in 0..secs {
            self.clock.advance(Duration::from_secs(1));
            self.service.tick_once();
            self.pump().await;
        }
    }

    async fn complete_job(&mut self, job_type: &str, result: Variables) {
        let claimed = self
            .engine
            .jobs()
            .activate(job_type, "worker", 1, Duration::from_secs(30))
            .unwrap();
        assert_eq!(claimed.len(), 1, "no activatable {job_type} job");
        let job = self.engine.jobs().complete(&claimed[0].id, &result).unwrap();
        self.engine.on_job_completed(&job).await.unwrap();
    }
}

fn flow(id: &str, from: &str, to: &str) -> SequenceFlow {
    SequenceFlow { id: id.into(), source_ref: from.into(), target_ref: to.into(), condition: None }
}

fn service_task(id: &str, job_type: &str, retries: u32) -> Element {
    Element::ServiceTask {
        id: id.into(),
        name: None,
        task: TaskDefinition { task_type: job_type.into(), retries },
        headers: Default::default(),
    }
}

fn timer_request(duration: &str) -> TimerRequest {
    TimerRequest::duration(
        "timer1",
        flow_core::TokenId::from_string("tok-1"),
        flow_core::InstanceId::from_string("inst-1"),
        flow_core::TimerType::Event,
        duration,
    )
}

// Scenario 1: PT30S fires within [t₀+30 s, t₀+31 s); cancelled at
// t₀+10 s it never fires.
#[tokio::test]
async fn duration_timer_fires_in_window_and_cancel_suppresses() {
    let mut fx = harness();
    fx.service.schedule(&timer_request("PT30S")).unwrap();

    let mut fired_at = None;
    for i in 1..=40u64 {
        fx.clock.advance(Duration::from_secs(1));
        fx.service.tick_once();
        if fx.timer_events.try_recv().is_ok() {
            fired_at = Some(i);
            break;
        }
    }
    assert!(matches!(fired_at, Some(30..=31)), "fired at {fired_at:?}");

    // Cancel path.
    let mut fx = harness();
    let id = fx.service.schedule(&timer_request("PT30S")).unwrap();
    fx.clock.advance(Duration::from_secs(10));
    fx.service.tick_once();
    fx.service.cancel(&id).unwrap();
    for _ in 0..60 {
        fx.clock.advance(Duration::from_secs(1));
        fx.service.tick_once();
    }
    assert!(fx.timer_events.try_recv().is_err(), "cancelled timer fired");
}

// Scenario 2: R3/PT1S produces exactly three fires ≈1 s apart.
#[tokio::test]
async fn repeating_cycle_fires_exactly_three_times() {
    let mut fx = harness();
    let mut request = timer_request("PT1S");
    request.time_duration = None;
    request.time_cycle = Some("R3/PT1S".into());
    fx.service.schedule(&request).unwrap();

    let mut offsets = Vec::new();
    for i in 1..=10u64 {
        fx.clock.advance(Duration::from_secs(1));
        fx.service.tick_once();
        while fx.timer_events.try_recv().is_ok() {
            offsets.push(i);
        }
    }
    assert_eq!(offsets, vec![1, 2, 3]);
}

// Scenario 3: parallel split → two service tasks → join, starting with
// {a: 1}; the join spawns one successor carrying the merged variables.
#[tokio::test]
async fn parallel_split_join_merges_branch_variables() {
    let mut fx = harness();
    let definition = ProcessDefinition {
        process_key: "par".into(),
        name: None,
        version: 0,
        elements: vec![
            Element::StartEvent { id: "s".into(), name: None, trigger: EventTrigger::None },
            Element::ParallelGateway { id: "split".into(), name: None },
            service_task("t1", "left", 3),
            service_task("t2", "right", 3),
            Element::ParallelGateway { id: "join".into(), name: None },
            Element::EndEvent { id: "e".into(), name: None, trigger: EventTrigger::None },
        ],
        flows: vec![
            flow("f0", "s", "split"),
            flow("f1", "split", "t1"),
            flow("f2", "split", "t2"),
            flow("f3", "t1", "join"),
            flow("f4", "t2", "join"),
            flow("f5", "join", "e"),
        ],
    };
    fx.engine.definitions().deploy(definition).unwrap();

    let instance_id = fx
        .engine
        .start_instance("par", [("a".to_string(), json!(1))].into())
        .await
        .unwrap();

    fx.complete_job("left", [("left".to_string(), json!("L"))].into()).await;
    fx.complete_job("right", [("right".to_string(), json!("R"))].into()).await;

    let instance = fx.engine.instance(instance_id).unwrap();
    assert_eq!(instance.state, InstanceState::Completed);
    assert_eq!(instance.variables.get("a"), Some(&json!(1)));
    assert_eq!(instance.variables.get("left"), Some(&json!("L")));
    assert_eq!(instance.variables.get("right"), Some(&json!("R")));

    let successors = fx
        .engine
        .tokens_of(instance_id)
        .unwrap()
        .into_iter()
        .filter(|t| t.current_element_id == "e")
        .count();
    assert_eq!(successors, 1);
}

// Scenario 4: a message-start subscription with correlationKey ="VIP"
// starts a fresh instance seeded with the message payload.
#[tokio::test]
async fn message_start_subscription_spawns_instance_with_payload() {
    let mut fx = harness();
    let definition = ProcessDefinition {
        process_key: "order".into(),
        name: None,
        version: 0,
        elements: vec![
            Element::StartEvent {
                id: "msg_start".into(),
                name: None,
                trigger: EventTrigger::Message {
                    message_name: "order.created".into(),
                    correlation_key: Some(r#"="VIP""#.into()),
                },
            },
            Element::EndEvent { id: "e".into(), name: None, trigger: EventTrigger::None },
        ],
        flows: vec![flow("f1", "msg_start", "e")],
    };
    fx.engine.definitions().deploy(definition).unwrap();
    let parked = fx.engine.start_instance("order", Variables::new()).await.unwrap();
    assert_eq!(fx.engine.instance(parked).unwrap().state, InstanceState::Messages);

    let outcome = fx
        .correlator
        .publish(
            "order.created",
            Some("VIP"),
            &[("orderId".to_string(), json!("x"))].into(),
            None,
        )
        .unwrap();
    let PublishOutcome::Correlated(CorrelationOutcome::InstanceStarted { instance_id }) = outcome
    else {
        panic!("expected a new instance, got {outcome:?}");
    };
    fx.pump().await;

    let instance = fx.engine.instance(instance_id).unwrap();
    assert_eq!(instance.state, InstanceState::Completed);
    assert_eq!(instance.variables.get("orderId"), Some(&json!("x")));
    // The permanent start subscription survives the dispatch.
    let subscriptions: Vec<ProcessMessageSubscription> =
        fx.store.scan_json(keys::SUBSCRIPTION_PREFIX).unwrap();
    assert_eq!(subscriptions.len(), 1);
}

// Scenario 5: retries = 2, the worker fails three times with PT1S
// backoff: the job ends FAILED, a JOB incident opens, the token fails.
#[tokio::test]
async fn exhausted_retries_open_incident_and_fail_token() {
    let mut fx = harness();
    let definition = ProcessDefinition {
        process_key: "order".into(),
        name: None,
        version: 0,
        elements: vec![
            Element::StartEvent { id: "s".into(), name: None, trigger: EventTrigger::None },
            service_task("t1", "work", 2),
            Element::EndEvent { id: "e".into(), name: None, trigger: EventTrigger::None },
        ],
        flows: vec![flow("f1", "s", "t1"), flow("f2", "t1", "e")],
    };
    fx.engine.definitions().deploy(definition).unwrap();
    let instance_id = fx.engine.start_instance("order", Variables::new()).await.unwrap();

    let mut attempts = 0;
    let job_id = loop {
        let claimed = fx
            .engine
            .jobs()
            .activate("work", "worker", 1, Duration::from_secs(30))
            .unwrap();
        assert!(!claimed.is_empty(), "job not activatable on attempt {}", attempts + 1);
        attempts += 1;
        let outcome = fx
            .engine
            .jobs()
            .fail(&claimed[0].id, "downstream unavailable", None, Some("PT1S"))
            .unwrap();
        fx.engine.on_job_failed(&outcome).await.unwrap();
        if outcome.exhausted {
            break claimed[0].id;
        }
        fx.run_secs(2).await;
    };

    assert_eq!(attempts, 3);
    let job = fx.engine.jobs().get(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);

    let incidents: Vec<flow_core::Incident> = fx.store.scan_json(keys::INCIDENT_PREFIX).unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].kind, IncidentKind::Job);

    let token = fx.engine.token(job.token_id).unwrap();
    assert_eq!(token.state, TokenState::Failed);
    assert_eq!(fx.engine.instance(instance_id).unwrap().state, InstanceState::Failed);
}

// Scenario 6: PT10S scheduled at t₀, process stops at t₀+2 s and
// restarts at t₀+15 s: the timer fires immediately with its original id
// and the due date persisted as t₀+10 s.
#[tokio::test]
async fn restart_replays_overdue_timer_with_original_identity() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::new(dir.path().join("db"));
    config.flush_every_ms = None;
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_700_000_000_000);
    let t0 = clock.now_utc();

    let timer_id = {
        let store = Store::open(&config).unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let service = TimerService::new(store.clone(), clock.clone(), tx);
        let id = service.schedule(&timer_request("PT10S")).unwrap();
        clock.advance(Duration::from_secs(2));
        service.tick_once();
        store.flush().unwrap();
        id
    };

    clock.advance(Duration::from_secs(13));
    let store = Store::open(&config).unwrap();
    let (tx, mut rx) = mpsc::channel(8);
    let service = TimerService::new(store, clock.clone(), tx);
    let summary = service.restore().unwrap();
    assert_eq!(summary.replayed, 1);
    assert_eq!(summary.reinserted, 0);

    let fired = rx.try_recv().unwrap();
    assert_eq!(fired.timer_id, timer_id);

    let record = service.record(&timer_id).unwrap();
    assert_eq!(record.state, TimerState::Fired);
    assert_eq!(record.due_date, t0 + chrono::Duration::seconds(10));
}

// Full integration: an interrupting boundary timer riding the real wheel
// cancels the slow job and reroutes the token.
#[tokio::test]
async fn boundary_timer_interrupts_slow_service_task_through_the_wheel() {
    let mut fx = harness();
    let definition = ProcessDefinition {
        process_key: "slow".into(),
        name: None,
        version: 0,
        elements: vec![
            Element::StartEvent { id: "s".into(), name: None, trigger: EventTrigger::None },
            service_task("t1", "work", 3),
            Element::BoundaryEvent {
                id: "deadline".into(),
                name: None,
                attached_to_ref: "t1".into(),
                cancel_activity: true,
                trigger: EventTrigger::Timer {
                    timer: TimerSpec {
                        time_duration: Some("PT10S".into()),
                        ..Default::default()
                    },
                },
            },
            Element::EndEvent { id: "done".into(), name: None, trigger: EventTrigger::None },
            Element::EndEvent { id: "timed_out".into(), name: None, trigger: EventTrigger::None },
        ],
        flows: vec![
            flow("f1", "s", "t1"),
            flow("f2", "t1", "done"),
            flow("f3", "deadline", "timed_out"),
        ],
    };
    fx.engine.definitions().deploy(definition).unwrap();
    let instance_id = fx.engine.start_instance("slow", Variables::new()).await.unwrap();
    let job_id = fx
        .engine
        .jobs()
        .activate("work", "worker", 1, Duration::from_secs(60))
        .unwrap()[0]
        .id;

    // Nobody completes the job; the wheel does its thing.
    fx.run_secs(12).await;

    assert_eq!(fx.engine.jobs().get(&job_id).unwrap().status, JobStatus::Canceled);
    let instance = fx.engine.instance(instance_id).unwrap();
    assert_eq!(instance.state, InstanceState::Completed);
    let routed = fx
        .engine
        .tokens_of(instance_id)
        .unwrap()
        .into_iter()
        .any(|t| t.current_element_id == "timed_out");
    assert!(routed);
}
