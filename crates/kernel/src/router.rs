// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Response fan-out and the component request envelope surface.
//!
//! `route_responses` is a pure dispatcher: every component response is
//! journaled and forwarded to the engine callback that must react; no
//! business logic lives here. `handle_envelope` is the `{type, payload}`
//! seam external transports speak.

use crate::kernel::{Kernel, KernelError};
use flow_core::{
    InstanceId, JobId, RequestEnvelope, ResponseEnvelope, SystemClock, TimerId, Variables,
};
use flow_engine::{
    CorrelationEvent, CorrelatorRequest, MessageCallback, PublishOutcome, TimerCallback,
    TokenEngine,
};
use flow_store::SystemJournal;
use flow_wheel::{TimerFired, WheelRequest};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Forward component responses to the engine callbacks.
pub(crate) async fn route_responses(
    engine: Arc<TokenEngine<SystemClock>>,
    journal: Arc<SystemJournal>,
    mut timer_responses: mpsc::Receiver<TimerFired>,
    mut correlation_responses: mpsc::Receiver<CorrelationEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            fired = timer_responses.recv() => match fired {
                Some(fired) => {
                    append(&journal, json!({
                        "type": "timer_fired",
                        "timer_id": fired.timer_id.as_str(),
                        "element_id": fired.element_id,
                        "instance_id": fired.process_instance_id.as_str(),
                    }));
                    if let Err(e) = TimerCallback::on_timer_fired(engine.as_ref(), fired).await {
                        tracing::error!(error = %e, "timer callback failed");
                    }
                }
                None => break,
            },
            event = correlation_responses.recv() => match event {
                Some(event) => {
                    append(&journal, json!({
                        "type": "message_correlated",
                        "message_name": event.message_name,
                    }));
                    if let Err(e) =
                        MessageCallback::on_message_correlated(engine.as_ref(), event).await
                    {
                        tracing::error!(error = %e, "message callback failed");
                    }
                }
                None => break,
            },
        }
    }
    tracing::info!("response router stopped");
}

fn append(journal: &SystemJournal, event: Value) {
    if let Err(e) = journal.append(&event) {
        tracing::warn!(error = %e, "failed to journal response");
    }
}

#[derive(Deserialize)]
struct StartInstancePayload {
    process_key: String,
    #[serde(default)]
    variables: Variables,
}

#[derive(Deserialize)]
struct InstancePayload {
    instance_id: String,
}

#[derive(Deserialize)]
struct TimerPayload {
    timer_id: String,
}

#[derive(Deserialize)]
struct PublishPayload {
    name: String,
    #[serde(default)]
    correlation_key: Option<String>,
    #[serde(default)]
    variables: Variables,
    #[serde(default)]
    ttl_seconds: Option<u64>,
}

#[derive(Deserialize)]
struct CorrelatePayload {
    name: String,
    #[serde(default)]
    correlation_key: Option<String>,
    instance_id: String,
    #[serde(default)]
    variables: Variables,
}

#[derive(Deserialize)]
struct ActivatePayload {
    job_type: String,
    worker_id: String,
    #[serde(default = "default_max_count")]
    max_count: usize,
    #[serde(default = "default_lock_timeout_seconds")]
    lock_timeout_seconds: u64,
}

fn default_max_count() -> usize {
    32
}

fn default_lock_timeout_seconds() -> u64 {
    300
}

#[derive(Deserialize)]
struct CompleteJobPayload {
    job_id: String,
    #[serde(default)]
    variables: Variables,
}

#[derive(Deserialize)]
struct FailJobPayload {
    job_id: String,
    error_message: String,
    #[serde(default)]
    retries: Option<u32>,
    #[serde(default)]
    backoff_duration: Option<String>,
}

#[derive(Deserialize)]
struct JobPayload {
    job_id: String,
}

impl Kernel {
    /// Dispatch a `{type, payload}` request and produce the matching
    /// response envelope. Input errors are reported synchronously and
    /// never persisted.
    pub async fn handle_envelope(&self, envelope: RequestEnvelope) -> ResponseEnvelope {
        let kind = envelope.kind.clone();
        let request_id = envelope.request_id.clone();
        match self.dispatch_envelope(envelope).await {
            Ok(result) => ResponseEnvelope::ok(kind, request_id, result),
            Err(e) => ResponseEnvelope::err(kind, request_id, e.to_string()),
        }
    }

    async fn dispatch_envelope(&self, envelope: RequestEnvelope) -> Result<Value, KernelError> {
        match envelope.kind.as_str() {
            "deploy_process" => {
                let definition = parse(envelope.payload)?;
                let version = self.deploy(definition)?;
                Ok(json!({ "version": version }))
            }
            "start_instance" => {
                let payload: StartInstancePayload = parse(envelope.payload)?;
                let instance_id =
                    self.start_instance(&payload.process_key, payload.variables).await?;
                Ok(json!({ "instance_id": instance_id.as_str() }))
            }
            "cancel_instance" => {
                let payload: InstancePayload = parse(envelope.payload)?;
                self.cancel_instance(InstanceId::from_string(payload.instance_id)).await?;
                Ok(Value::Null)
            }
            "schedule_timer" => {
                let request: flow_wheel::TimerRequest = parse(envelope.payload)?;
                let (reply_tx, reply_rx) = oneshot::channel();
                self.timer_requests()
                    .send(WheelRequest::Schedule {
                        request: Box::new(request),
                        reply: Some(reply_tx),
                    })
                    .await
                    .map_err(|_| KernelError::Unavailable("timer service"))?;
                let timer_id = reply_rx
                    .await
                    .map_err(|_| KernelError::Unavailable("timer service"))??;
                Ok(json!({ "timer_id": timer_id.as_str() }))
            }
            "cancel_timer" => {
                let payload: TimerPayload = parse(envelope.payload)?;
                let (reply_tx, reply_rx) = oneshot::channel();
                self.timer_requests()
                    .send(WheelRequest::Cancel {
                        timer_id: TimerId::from_string(payload.timer_id),
                        reply: Some(reply_tx),
                    })
                    .await
                    .map_err(|_| KernelError::Unavailable("timer service"))?;
                reply_rx.await.map_err(|_| KernelError::Unavailable("timer service"))??;
                Ok(Value::Null)
            }
            "timer_stats" => {
                let (reply_tx, reply_rx) = oneshot::channel();
                self.timer_requests()
                    .send(WheelRequest::Stats { reply: reply_tx })
                    .await
                    .map_err(|_| KernelError::Unavailable("timer service"))?;
                let stats =
                    reply_rx.await.map_err(|_| KernelError::Unavailable("timer service"))?;
                Ok(serde_json::to_value(stats).map_err(flow_store::StoreError::from)?)
            }
            "publish_message" => {
                let payload: PublishPayload = parse(envelope.payload)?;
                let outcome = self
                    .publish_message(
                        payload.name,
                        payload.correlation_key,
                        payload.variables,
                        payload.ttl_seconds.map(Duration::from_secs),
                    )
                    .await?;
                Ok(publish_outcome_json(outcome))
            }
            "correlate_message" => {
                let payload: CorrelatePayload = parse(envelope.payload)?;
                let (reply_tx, reply_rx) = oneshot::channel();
                self.correlator_requests()
                    .send(CorrelatorRequest::Correlate {
                        name: payload.name,
                        correlation_key: payload.correlation_key,
                        instance_id: InstanceId::from_string(payload.instance_id),
                        variables: payload.variables,
                        reply: Some(reply_tx),
                    })
                    .await
                    .map_err(|_| KernelError::Unavailable("message correlator"))?;
                let outcome = reply_rx
                    .await
                    .map_err(|_| KernelError::Unavailable("message correlator"))??;
                Ok(publish_outcome_json(outcome))
            }
            "create_subscription" => {
                let subscription: flow_core::ProcessMessageSubscription =
                    parse(envelope.payload)?;
                let (reply_tx, reply_rx) = oneshot::channel();
                self.correlator_requests()
                    .send(CorrelatorRequest::CreateSubscription {
                        subscription: Box::new(subscription),
                        reply: Some(reply_tx),
                    })
                    .await
                    .map_err(|_| KernelError::Unavailable("message correlator"))?;
                reply_rx
                    .await
                    .map_err(|_| KernelError::Unavailable("message correlator"))??;
                Ok(Value::Null)
            }
            "activate_jobs" => {
                let payload: ActivatePayload = parse(envelope.payload)?;
                let jobs = self.activate_jobs(
                    &payload.job_type,
                    &payload.worker_id,
                    payload.max_count,
                    Duration::from_secs(payload.lock_timeout_seconds),
                )?;
                Ok(serde_json::to_value(jobs).map_err(flow_store::StoreError::from)?)
            }
            "complete_job" => {
                let payload: CompleteJobPayload = parse(envelope.payload)?;
                self.complete_job(&JobId::from_string(payload.job_id), payload.variables)
                    .await?;
                Ok(Value::Null)
            }
            "fail_job" => {
                let payload: FailJobPayload = parse(envelope.payload)?;
                self.fail_job(
                    &JobId::from_string(payload.job_id),
                    &payload.error_message,
                    payload.retries,
                    payload.backoff_duration.as_deref(),
                )
                .await?;
                Ok(Value::Null)
            }
            "cancel_job" => {
                let payload: JobPayload = parse(envelope.payload)?;
                self.cancel_job(&JobId::from_string(payload.job_id))?;
                Ok(Value::Null)
            }
            other => Err(KernelError::Engine(flow_engine::EngineError::InvalidRequest(
                format!("unknown request type: {other}"),
            ))),
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, KernelError> {
    serde_json::from_value(payload).map_err(|e| {
        KernelError::Engine(flow_engine::EngineError::InvalidRequest(format!(
            "malformed payload: {e}"
        )))
    })
}

fn publish_outcome_json(outcome: PublishOutcome) -> Value {
    match outcome {
        PublishOutcome::Correlated(correlation) => {
            json!({ "correlated": true, "outcome": serde_json::to_value(correlation).unwrap_or(Value::Null) })
        }
        PublishOutcome::Buffered(message_id) => {
            json!({ "correlated": false, "buffered_message_id": message_id.as_str() })
        }
    }
}
