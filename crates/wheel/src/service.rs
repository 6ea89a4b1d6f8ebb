// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timer service: persistence, firing, and the request/response loop.

use crate::error::WheelError;
use crate::request::{resolve_due, TimerFired, TimerRequest};
use crate::wheel::{TimingWheel, WheelStats};
use chrono::{DateTime, Utc};
use flow_core::{parse_cycle, Clock, TimerDefinition, TimerId, TimerRecord, TimerState};
use flow_store::{keys, Store};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Commands accepted on the service's request channel.
pub enum WheelRequest {
    Schedule {
        request: Box<TimerRequest>,
        reply: Option<oneshot::Sender<Result<TimerId, WheelError>>>,
    },
    Cancel {
        timer_id: TimerId,
        reply: Option<oneshot::Sender<Result<(), WheelError>>>,
    },
    Remaining {
        timer_id: TimerId,
        reply: oneshot::Sender<Result<chrono::Duration, WheelError>>,
    },
    Stats {
        reply: oneshot::Sender<WheelStats>,
    },
}

/// Outcome of the startup restore pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RestoreSummary {
    /// Timers re-inserted with their original id and due date.
    pub reinserted: usize,
    /// Overdue timers fired immediately on restore.
    pub replayed: usize,
}

/// Owns the wheel, persists timer records, and emits fired events.
pub struct TimerService<C: Clock> {
    wheel: TimingWheel,
    store: Store,
    clock: C,
    response_tx: mpsc::Sender<TimerFired>,
}

impl<C: Clock> TimerService<C> {
    pub fn new(store: Store, clock: C, response_tx: mpsc::Sender<TimerFired>) -> Self {
        Self { wheel: TimingWheel::with_default_levels(), store, clock, response_tx }
    }

    /// Validate, compute the due date, persist as SCHEDULED, and insert.
    pub fn schedule(&self, request: &TimerRequest) -> Result<TimerId, WheelError> {
        let definition = request.validate()?;
        let now = self.clock.now_utc();
        let base = request.base_time.unwrap_or(now);
        let (computed_due, repetitions) = resolve_due(&definition, base)?;

        let id = request.restore_timer_id.unwrap_or_else(TimerId::fresh);
        let due_date = request.restore_due_date.unwrap_or(computed_due);

        let record = TimerRecord {
            id,
            element_id: request.element_id.clone(),
            token_id: request.token_id,
            process_instance_id: request.process_instance_id,
            timer_type: request.timer_type,
            state: TimerState::Scheduled,
            definition,
            due_date,
            scheduled_at: base,
            fired_at: None,
            repetitions_left: repetitions,
            process_context: request.process_context.clone(),
            variables: request.variables.clone(),
        };
        self.store.put_json(&keys::timer(id.as_str()), &record)?;
        self.wheel.insert(record, now);
        tracing::debug!(timer_id = %id, due = %due_date, "timer scheduled");
        Ok(id)
    }

    /// Cancel a timer. Idempotent: cancelling after fire, after cancel, or
    /// for an unknown id still reports success.
    pub fn cancel(&self, timer_id: &TimerId) -> Result<(), WheelError> {
        let removed = self.wheel.cancel(timer_id.as_str());

        let key = keys::timer(timer_id.as_str());
        if let Some(mut record) = self.store.try_get_json::<TimerRecord>(&key)? {
            if !record.is_terminal() {
                record.state = TimerState::Canceled;
                self.store.put_json(&key, &record)?;
            }
        }

        if removed {
            tracing::debug!(%timer_id, "timer cancelled");
        } else {
            tracing::debug!(%timer_id, "cancel for timer not in wheel");
        }
        Ok(())
    }

    /// Time until the timer fires.
    pub fn remaining(&self, timer_id: &TimerId) -> Result<chrono::Duration, WheelError> {
        self.wheel
            .remaining(timer_id.as_str(), self.clock.now_utc())
            .ok_or_else(|| WheelError::NotFound(timer_id.as_str().to_string()))
    }

    pub fn stats(&self) -> WheelStats {
        self.wheel.stats()
    }

    /// Load the persisted record for a timer.
    pub fn record(&self, timer_id: &TimerId) -> Result<TimerRecord, WheelError> {
        Ok(self.store.get_json(&keys::timer(timer_id.as_str()))?)
    }

    /// Re-arm every persisted SCHEDULED timer after a restart.
    ///
    /// Due dates are recomputed from the original definition anchored at
    /// the persisted `scheduled_at`; overdue timers fire immediately with
    /// their original id, the rest re-enter the wheel unchanged. Per-record
    /// failures are logged and skipped so one bad record cannot block boot.
    pub fn restore(&self) -> Result<RestoreSummary, WheelError> {
        let now = self.clock.now_utc();
        let records: Vec<TimerRecord> = self.store.scan_json(keys::TIMER_PREFIX)?;
        let mut summary = RestoreSummary::default();

        for mut record in records {
            if record.state != TimerState::Scheduled {
                continue;
            }
            let due = match resolve_due(&record.definition, record.scheduled_at) {
                Ok((due, _)) => due,
                Err(e) => {
                    tracing::warn!(timer_id = %record.id, error = %e, "skipping unrestorable timer");
                    continue;
                }
            };
            record.due_date = due;
            if due <= now {
                summary.replayed += 1;
                self.fire(record, now);
            } else {
                summary.reinserted += 1;
                self.wheel.insert(record, now);
            }
        }

        tracing::info!(
            reinserted = summary.reinserted,
            replayed = summary.replayed,
            "timer restore complete"
        );
        Ok(summary)
    }

    /// Advance the wheel by one tick and fire everything due.
    ///
    /// Returns the number of timers fired.
    pub fn tick_once(&self) -> usize {
        let now = self.clock.now_utc();
        let due = self.wheel.tick(now);
        let count = due.len();
        for record in due {
            self.fire(record, now);
        }
        count
    }

    /// Flip state, persist, re-arm cycles, and emit the response event.
    fn fire(&self, mut record: TimerRecord, now: DateTime<Utc>) {
        let event = TimerFired {
            timer_id: record.id,
            element_id: record.element_id.clone(),
            token_id: record.token_id,
            process_instance_id: record.process_instance_id,
            timer_type: record.timer_type,
            process_context: record.process_context.clone(),
            fired_at: now,
            variables: record.variables.clone(),
        };

        record.fired_at = Some(now);
        let rearm = match &record.definition {
            TimerDefinition::Cycle(text) => {
                let next_left = record.repetitions_left.map(|n| n.saturating_sub(1));
                let more = next_left != Some(0);
                if more {
                    match parse_cycle(text) {
                        Ok(cycle) => {
                            // Anchor the next occurrence at the previous due
                            // date, not `now`, so cycles do not drift.
                            record.scheduled_at = record.due_date;
                            record.due_date += chrono::Duration::from_std(cycle.interval)
                                .unwrap_or_else(|_| chrono::Duration::zero());
                            record.repetitions_left = next_left;
                            true
                        }
                        Err(e) => {
                            tracing::warn!(timer_id = %record.id, error = %e, "cycle re-arm failed");
                            false
                        }
                    }
                } else {
                    false
                }
            }
            _ => false,
        };

        if !rearm {
            record.state = TimerState::Fired;
        }
        if let Err(e) = self.store.put_json(&keys::timer(record.id.as_str()), &record) {
            tracing::error!(timer_id = %record.id, error = %e, "failed to persist fired timer");
        }
        if rearm {
            self.wheel.insert(record, now);
        }

        match self.response_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(ev)) => {
                tracing::warn!(timer_id = %ev.timer_id, "timer response channel full, dropping fired event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("timer response channel closed, dropping fired event");
            }
        }
    }

    fn handle_request(&self, request: WheelRequest) {
        match request {
            WheelRequest::Schedule { request, reply } => {
                let result = self.schedule(&request);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            WheelRequest::Cancel { timer_id, reply } => {
                let result = self.cancel(&timer_id);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            WheelRequest::Remaining { timer_id, reply } => {
                let _ = reply.send(self.remaining(&timer_id));
            }
            WheelRequest::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    /// Service loop: one dedicated ticker plus the request channel.
    ///
    /// On shutdown the request channel is drained before exit so accepted
    /// commands are not lost.
    pub async fn run(
        self,
        mut requests: mpsc::Receiver<WheelRequest>,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.wheel.tick_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick_once();
                }
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
            }
        }

        requests.close();
        while let Ok(request) = requests.try_recv() {
            self.handle_request(request);
        }
        tracing::info!("timer service stopped");
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
