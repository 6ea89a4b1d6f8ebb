// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capability ports toward the other kernel components.
//!
//! The engine never holds a reference to the wheel or the correlator;
//! it talks through these seams and the kernel wires them to the real
//! request channels. Tests plug in recording fakes.

use crate::error::EngineError;
use crate::jobs::JobFailureOutcome;
use crate::messages::CorrelationEvent;
use async_trait::async_trait;
use flow_core::{
    InstanceId, Job, ProcessMessageSubscription, SubscriptionId, TimerId, Variables,
};
use flow_wheel::{TimerFired, TimerRequest};

/// Scheduling and cancelling timers.
#[async_trait]
pub trait TimerPort: Send + Sync {
    async fn schedule(&self, request: TimerRequest) -> Result<TimerId, EngineError>;
    async fn cancel(&self, timer_id: TimerId) -> Result<(), EngineError>;
}

/// Registering message interest and publishing outbound messages.
#[async_trait]
pub trait MessagePort: Send + Sync {
    async fn create_subscription(
        &self,
        subscription: ProcessMessageSubscription,
    ) -> Result<(), EngineError>;

    async fn delete_subscription(&self, id: SubscriptionId) -> Result<(), EngineError>;

    /// Publish a message produced by the process itself (message end
    /// events and message throw semantics).
    async fn publish(
        &self,
        name: String,
        correlation_key: Option<String>,
        variables: Variables,
    ) -> Result<(), EngineError>;
}

/// Starting and cancelling process instances.
#[async_trait]
pub trait ProcessLifecycle: Send + Sync {
    async fn start_instance(
        &self,
        process_key: &str,
        variables: Variables,
    ) -> Result<InstanceId, EngineError>;

    async fn cancel_instance(&self, instance_id: InstanceId) -> Result<(), EngineError>;
}

/// Receives fired-timer responses routed by the kernel.
#[async_trait]
pub trait TimerCallback: Send + Sync {
    async fn on_timer_fired(&self, fired: TimerFired) -> Result<(), EngineError>;
}

/// Receives job completion/failure responses routed by the kernel.
#[async_trait]
pub trait JobCallback: Send + Sync {
    async fn on_job_completed(&self, job: Job) -> Result<(), EngineError>;
    async fn on_job_failed(&self, outcome: JobFailureOutcome) -> Result<(), EngineError>;
}

/// Receives correlation events routed by the kernel.
#[async_trait]
pub trait MessageCallback: Send + Sync {
    async fn on_message_correlated(&self, event: CorrelationEvent) -> Result<(), EngineError>;
}
