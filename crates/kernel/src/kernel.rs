// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kernel lifecycle: startup, wiring, shutdown.

use crate::config::KernelConfig;
use crate::ports::{ChannelMessagePort, ChannelTimerPort};
use crate::router;
use flow_core::{
    init_node_prefix, InstanceId, Job, JobId, ProcessDefinition, SystemClock, Variables,
};
use flow_engine::{
    CorrelatorRequest, DefinitionStore, EngineError, JobCallback, JobRegistry, MessageCorrelator,
    PublishOutcome, SimpleEval, TokenEngine,
};
use flow_store::{Store, StoreError, SystemJournal};
use flow_wheel::{RestoreSummary, TimerService, WheelRequest};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("timer error: {0}")]
    Wheel(#[from] flow_wheel::WheelError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("component unavailable: {0}")]
    Unavailable(&'static str),
}

/// The wired system. Components talk through channels; the kernel owns
/// the channel endpoints and the background tasks.
pub struct Kernel {
    store: Store,
    journal: Arc<SystemJournal>,
    engine: Arc<TokenEngine<SystemClock>>,
    timer_requests: mpsc::Sender<WheelRequest>,
    correlator_requests: mpsc::Sender<CorrelatorRequest>,
    restore: RestoreSummary,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Kernel {
    /// Boot order: store → ID prefix → wheel (with restore) → job
    /// registry → correlator → engine. External transports attach on top
    /// of the public methods afterwards.
    pub fn start(config: KernelConfig) -> Result<Self, KernelError> {
        let store = Store::open(&config.store)?;
        init_node_prefix(&config.instance_name);
        let journal = Arc::new(SystemJournal::open(store.clone())?);
        let clock = SystemClock;

        let (timer_req_tx, timer_req_rx) = mpsc::channel(config.channel_capacity);
        let (timer_resp_tx, timer_resp_rx) = mpsc::channel(config.channel_capacity);
        let (corr_req_tx, corr_req_rx) = mpsc::channel(config.channel_capacity);
        let (corr_resp_tx, corr_resp_rx) = mpsc::channel(config.channel_capacity);

        let timer_service = TimerService::new(store.clone(), clock.clone(), timer_resp_tx);
        let restore = timer_service.restore()?;

        let definitions = DefinitionStore::new(store.clone());
        let jobs = JobRegistry::new(store.clone(), clock.clone());
        let correlator = Arc::new(MessageCorrelator::new(
            store.clone(),
            definitions.clone(),
            clock.clone(),
            corr_resp_tx,
        ));
        let engine = Arc::new(TokenEngine::new(
            store.clone(),
            definitions,
            Arc::new(SimpleEval),
            jobs,
            Arc::new(ChannelTimerPort::new(timer_req_tx.clone())),
            Arc::new(ChannelMessagePort::new(corr_req_tx.clone())),
            clock,
        ));

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(
            timer_service.run(timer_req_rx, shutdown.child_token()),
        ));
        tasks.push(tokio::spawn(
            Arc::clone(&correlator).run(corr_req_rx, shutdown.child_token()),
        ));
        tasks.push(tokio::spawn(Arc::clone(&correlator).run_buffer_sweeper(
            config.buffer_sweep_interval,
            config.sweep_timeout,
            shutdown.child_token(),
        )));
        tasks.push(tokio::spawn(Arc::clone(&correlator).run_result_sweeper(
            config.result_sweep_interval,
            config.result_retention,
            config.sweep_timeout,
            shutdown.child_token(),
        )));
        tasks.push(tokio::spawn(router::route_responses(
            Arc::clone(&engine),
            Arc::clone(&journal),
            timer_resp_rx,
            corr_resp_rx,
            shutdown.child_token(),
        )));

        tracing::info!(
            instance = %config.instance_name,
            timers_reinserted = restore.reinserted,
            timers_replayed = restore.replayed,
            "kernel started"
        );
        Ok(Self {
            store,
            journal,
            engine,
            timer_requests: timer_req_tx,
            correlator_requests: corr_req_tx,
            restore,
            shutdown,
            tasks,
        })
    }

    pub fn engine(&self) -> &Arc<TokenEngine<SystemClock>> {
        &self.engine
    }

    pub fn journal(&self) -> &SystemJournal {
        &self.journal
    }

    pub fn restore_summary(&self) -> RestoreSummary {
        self.restore
    }

    /// Request-channel handle for the timing wheel.
    pub fn timer_requests(&self) -> mpsc::Sender<WheelRequest> {
        self.timer_requests.clone()
    }

    /// Request-channel handle for the message correlator.
    pub fn correlator_requests(&self) -> mpsc::Sender<CorrelatorRequest> {
        self.correlator_requests.clone()
    }

    // --- transport-facing operations ---

    pub fn deploy(&self, definition: ProcessDefinition) -> Result<u32, KernelError> {
        Ok(self.engine.definitions().deploy(definition)?)
    }

    pub async fn start_instance(
        &self,
        process_key: &str,
        variables: Variables,
    ) -> Result<InstanceId, KernelError> {
        Ok(self.engine.start_instance(process_key, variables).await?)
    }

    pub async fn cancel_instance(&self, instance_id: InstanceId) -> Result<(), KernelError> {
        Ok(self.engine.cancel_instance(instance_id).await?)
    }

    pub fn activate_jobs(
        &self,
        job_type: &str,
        worker_id: &str,
        max_count: usize,
        lock_timeout: Duration,
    ) -> Result<Vec<Job>, KernelError> {
        Ok(self.engine.jobs().activate(job_type, worker_id, max_count, lock_timeout)?)
    }

    /// Worker completion: transition the job, journal it, and hand the
    /// result to the engine's job callback.
    pub async fn complete_job(
        &self,
        job_id: &JobId,
        variables: Variables,
    ) -> Result<(), KernelError> {
        let job = self.engine.jobs().complete(job_id, &variables)?;
        self.append_journal(json!({
            "type": "job_completed",
            "job_id": job.id.as_str(),
            "job_type": job.job_type,
        }));
        JobCallback::on_job_completed(self.engine.as_ref(), job).await?;
        Ok(())
    }

    /// Worker failure: drive the retry loop and, on exhaustion, the
    /// engine's failure callback.
    pub async fn fail_job(
        &self,
        job_id: &JobId,
        error_message: &str,
        retries: Option<u32>,
        backoff: Option<&str>,
    ) -> Result<(), KernelError> {
        let outcome = self.engine.jobs().fail(job_id, error_message, retries, backoff)?;
        self.append_journal(json!({
            "type": "job_failed",
            "job_id": outcome.job.id.as_str(),
            "exhausted": outcome.exhausted,
        }));
        JobCallback::on_job_failed(self.engine.as_ref(), outcome).await?;
        Ok(())
    }

    pub fn cancel_job(&self, job_id: &JobId) -> Result<(), KernelError> {
        self.engine.jobs().cancel(job_id)?;
        Ok(())
    }

    /// Publish a message through the correlator's request channel.
    pub async fn publish_message(
        &self,
        name: String,
        correlation_key: Option<String>,
        variables: Variables,
        ttl: Option<Duration>,
    ) -> Result<PublishOutcome, KernelError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.correlator_requests
            .send(CorrelatorRequest::Publish {
                name,
                correlation_key,
                variables,
                ttl,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| KernelError::Unavailable("message correlator"))?;
        let outcome =
            reply_rx.await.map_err(|_| KernelError::Unavailable("message correlator"))??;
        Ok(outcome)
    }

    pub(crate) fn append_journal(&self, event: serde_json::Value) {
        if let Err(e) = self.journal.append(&event) {
            tracing::warn!(error = %e, "failed to journal event");
        }
    }

    /// Shutdown in reverse startup order. The cancellation token stops
    /// every loop; each service drains its request channel before
    /// exiting, and the store is flushed last.
    pub async fn shutdown(self) {
        tracing::info!("kernel shutting down");
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "component task did not stop cleanly");
            }
        }
        if let Err(e) = self.store.flush() {
            tracing::warn!(error = %e, "final store flush failed");
        }
        tracing::info!("kernel stopped");
    }
}

#[cfg(test)]
#[path = "kernel_tests.rs"]
mod tests;
