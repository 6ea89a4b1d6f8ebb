// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job registry: the outbound work queue for external workers.
//!
//! Activation is pull-based, so the queue bounds itself; workers request
//! up to `max_count` jobs of a type and the registry atomically flips them
//! to RUNNING. Failures drive the retry-with-backoff loop; exhausted
//! retries open a JOB incident.

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use flow_core::{
    parse_duration, Clock, Incident, IncidentKind, InstanceId, Job, JobId, JobStatus, TokenId,
    Variables,
};
use flow_store::{keys, BatchOp, Store};
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;

/// First retry delay of the default exponential backoff.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Ceiling for computed backoff delays.
pub const BACKOFF_CAP: Duration = Duration::from_secs(300);

/// Jitter fraction added on top of the computed delay.
const BACKOFF_JITTER: f64 = 0.25;

/// What a `fail` call did to the job.
#[derive(Debug, Clone)]
pub struct JobFailureOutcome {
    pub job: Job,
    /// True when retries are exhausted: the job is terminal FAILED, an
    /// incident is open, and the owning token must be failed.
    pub exhausted: bool,
}

#[derive(Clone)]
pub struct JobRegistry<C: Clock> {
    store: Store,
    clock: C,
}

impl<C: Clock> JobRegistry<C> {
    pub fn new(store: Store, clock: C) -> Self {
        Self { store, clock }
    }

    /// Create a PENDING job. The owning token's ID is injected into the
    /// variable snapshot so it survives the worker round-trip.
    #[allow(clippy::too_many_arguments)]
    pub fn create_job(
        &self,
        job_type: &str,
        process_instance_id: InstanceId,
        element_id: &str,
        token_id: TokenId,
        headers: HashMap<String, String>,
        variables: Variables,
        max_retries: u32,
    ) -> Result<JobId, EngineError> {
        let job = Job::new(
            JobId::fresh(),
            job_type,
            process_instance_id,
            element_id,
            token_id,
            headers,
            variables,
            max_retries,
            self.clock.now_utc(),
        );
        self.store.put_json(&keys::job(job.id.as_str()), &job)?;
        tracing::debug!(job_id = %job.id, job_type, "job created");
        Ok(job.id)
    }

    pub fn get(&self, job_id: &JobId) -> Result<Job, EngineError> {
        self.store
            .try_get_json(&keys::job(job_id.as_str()))?
            .ok_or_else(|| EngineError::NotFound(format!("job: {job_id}")))
    }

    /// Atomically claim up to `max_count` eligible jobs of a type.
    ///
    /// Eligible: PENDING, DEFERRED past its `scheduled_at`, or RUNNING
    /// with an expired activation lock (worker presumed dead). Claimed
    /// jobs are stamped with the worker, `started_at`, and a fresh lock
    /// deadline, and all updates land in one batch.
    pub fn activate(
        &self,
        job_type: &str,
        worker_id: &str,
        max_count: usize,
        lock_timeout: Duration,
    ) -> Result<Vec<Job>, EngineError> {
        let now = self.clock.now_utc();
        let mut eligible: Vec<Job> = self
            .store
            .scan_json::<Job>(keys::JOB_PREFIX)?
            .into_iter()
            .filter(|job| job.job_type == job_type && Self::is_eligible(job, now))
            .collect();

        eligible.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at))
        });
        eligible.truncate(max_count);

        let lock_deadline = now
            + chrono::Duration::from_std(lock_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let mut ops = Vec::with_capacity(eligible.len());
        for job in &mut eligible {
            job.status = JobStatus::Running;
            job.worker_id = Some(worker_id.to_string());
            job.started_at = Some(now);
            job.scheduled_at = Some(lock_deadline);
            ops.push(BatchOp::put_json(keys::job(job.id.as_str()), job)?);
        }
        if !ops.is_empty() {
            self.store.batch(ops)?;
            tracing::debug!(job_type, worker_id, count = eligible.len(), "jobs activated");
        }
        Ok(eligible)
    }

    fn is_eligible(job: &Job, now: DateTime<Utc>) -> bool {
        match job.status {
            JobStatus::Pending => true,
            JobStatus::Deferred => job.scheduled_at.map(|at| at <= now).unwrap_or(true),
            JobStatus::Running => job.scheduled_at.map(|at| at <= now).unwrap_or(false),
            _ => false,
        }
    }

    /// RUNNING → COMPLETED. Returns the final snapshot with the worker's
    /// result variables merged in; the engine merges them into the owning
    /// token (a no-op when the token has vanished).
    pub fn complete(&self, job_id: &JobId, variables: &Variables) -> Result<Job, EngineError> {
        let mut job = self.get(job_id)?;
        if job.status != JobStatus::Running {
            return Err(EngineError::InvalidRequest(format!(
                "job {job_id} is {} and cannot be completed",
                job.status
            )));
        }
        flow_core::merge_variables(&mut job.variables, variables);
        job.status = JobStatus::Completed;
        job.completed_at = Some(self.clock.now_utc());
        job.scheduled_at = None;
        self.store.put_json(&keys::job(job_id.as_str()), &job)?;
        tracing::debug!(%job_id, "job completed");
        Ok(job)
    }

    /// RUNNING → DEFERRED while retries remain, FAILED (plus an open JOB
    /// incident) once exhausted.
    ///
    /// `retries` is the worker-reported remaining count; when absent the
    /// stored count is decremented. The retry delay is the explicit
    /// ISO-8601 `backoff` when given, else exponential with jitter.
    pub fn fail(
        &self,
        job_id: &JobId,
        error_message: &str,
        retries: Option<u32>,
        backoff: Option<&str>,
    ) -> Result<JobFailureOutcome, EngineError> {
        let mut job = self.get(job_id)?;
        if job.status != JobStatus::Running {
            return Err(EngineError::InvalidRequest(format!(
                "job {job_id} is {} and cannot be failed",
                job.status
            )));
        }
        let now = self.clock.now_utc();
        // A job with `retries = n` is attempted n + 1 times: exhaustion is
        // checked before the decrement, so `retries = 0` (stored or
        // worker-reported) is what opens the incident.
        let (remaining, exhausted) = match retries {
            Some(0) => (0, true),
            Some(reported) => (reported, false),
            None if job.retries == 0 => (0, true),
            None => (job.retries - 1, false),
        };
        job.retries = remaining;
        job.error_message = Some(error_message.to_string());
        job.worker_id = None;

        if !exhausted {
            let delay = match backoff {
                Some(text) => parse_duration(text)
                    .map_err(|e| EngineError::InvalidRequest(e.to_string()))?,
                None => self.backoff_delay(&job),
            };
            job.status = JobStatus::Deferred;
            job.started_at = None;
            job.scheduled_at = Some(
                now + chrono::Duration::from_std(delay)
                    .unwrap_or_else(|_| chrono::Duration::seconds(1)),
            );
            self.store.put_json(&keys::job(job_id.as_str()), &job)?;
            tracing::debug!(%job_id, remaining, delay_ms = delay.as_millis() as u64, "job deferred for retry");
            return Ok(JobFailureOutcome { job, exhausted: false });
        }

        job.status = JobStatus::Failed;
        job.completed_at = Some(now);
        job.scheduled_at = None;
        let incident = Incident::open(
            IncidentKind::Job,
            format!("job {} failed permanently: {error_message}", job.id),
            now,
        )
        .with_instance(job.process_instance_id)
        .with_element(job.element_id.clone())
        .with_token(job.token_id)
        .with_job(job.id);

        self.store.batch(vec![
            BatchOp::put_json(keys::job(job_id.as_str()), &job)?,
            BatchOp::put_json(keys::incident(incident.id.as_str()), &incident)?,
        ])?;
        tracing::warn!(%job_id, incident_id = %incident.id, "job retries exhausted, incident opened");
        Ok(JobFailureOutcome { job, exhausted: true })
    }

    /// Cancel a job. Terminal jobs are left untouched (no-op success).
    pub fn cancel(&self, job_id: &JobId) -> Result<Job, EngineError> {
        let mut job = self.get(job_id)?;
        if job.is_terminal() {
            return Ok(job);
        }
        job.status = JobStatus::Canceled;
        job.completed_at = Some(self.clock.now_utc());
        job.scheduled_at = None;
        self.store.put_json(&keys::job(job_id.as_str()), &job)?;
        tracing::debug!(%job_id, "job cancelled");
        Ok(job)
    }

    /// `base × 2^attempt` with up to 25% jitter, capped.
    fn backoff_delay(&self, job: &Job) -> Duration {
        let exponent = (job.max_retries - job.retries).saturating_sub(1).min(16);
        let base = BACKOFF_BASE.as_millis() as u64;
        let raw = base.saturating_mul(1u64 << exponent);
        let capped = raw.min(BACKOFF_CAP.as_millis() as u64);
        let jitter = rand::thread_rng().gen_range(0.0..=BACKOFF_JITTER);
        Duration::from_millis((capped as f64 * (1.0 + jitter)) as u64)
    }
}

#[cfg(test)]
#[path = "jobs_tests.rs"]
mod tests;
