// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timer schedule requests and fired events.

use crate::error::WheelError;
use chrono::{DateTime, Utc};
use flow_core::{
    parse_cycle, parse_date, parse_duration, InstanceId, ProcessContext, TimerDefinition, TimerId,
    TimerType, TokenId, Variables,
};
use serde::{Deserialize, Serialize};

/// A request to schedule a timer.
///
/// Exactly one of `time_date`, `time_duration`, or `time_cycle` must be
/// provided. `restore_timer_id`/`restore_due_date` are set only by the
/// restore path so a re-inserted timer keeps its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerRequest {
    pub element_id: String,
    pub token_id: TokenId,
    pub process_instance_id: InstanceId,
    pub timer_type: TimerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_context: Option<ProcessContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_cycle: Option<String>,
    /// Base time for relative definitions; defaults to the schedule time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_timer_id: Option<TimerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub variables: Variables,
}

impl TimerRequest {
    pub fn duration(
        element_id: impl Into<String>,
        token_id: TokenId,
        process_instance_id: InstanceId,
        timer_type: TimerType,
        duration: impl Into<String>,
    ) -> Self {
        Self {
            element_id: element_id.into(),
            token_id,
            process_instance_id,
            timer_type,
            process_context: None,
            time_date: None,
            time_duration: Some(duration.into()),
            time_cycle: None,
            base_time: None,
            restore_timer_id: None,
            restore_due_date: None,
            variables: Variables::new(),
        }
    }

    /// Validate the request shape and return the typed definition.
    pub fn validate(&self) -> Result<TimerDefinition, WheelError> {
        if self.element_id.is_empty() {
            return Err(WheelError::InvalidRequest("element_id is required".into()));
        }
        if self.token_id.is_empty() {
            return Err(WheelError::InvalidRequest("token_id is required".into()));
        }
        if self.process_instance_id.is_empty() {
            return Err(WheelError::InvalidRequest("process_instance_id is required".into()));
        }

        let provided = [
            self.time_date.as_ref().map(|s| TimerDefinition::Date(s.clone())),
            self.time_duration.as_ref().map(|s| TimerDefinition::Duration(s.clone())),
            self.time_cycle.as_ref().map(|s| TimerDefinition::Cycle(s.clone())),
        ];
        let mut definitions = provided.into_iter().flatten();
        let definition = definitions.next().ok_or_else(|| {
            WheelError::InvalidRequest(
                "one of time_date, time_duration, time_cycle is required".into(),
            )
        })?;
        if definitions.next().is_some() {
            return Err(WheelError::InvalidRequest(
                "time_date, time_duration, and time_cycle are mutually exclusive".into(),
            ));
        }

        // Parse eagerly so malformed definitions fail at schedule time.
        match &definition {
            TimerDefinition::Date(text) => {
                parse_date(text)?;
            }
            TimerDefinition::Duration(text) => {
                parse_duration(text)?;
            }
            TimerDefinition::Cycle(text) => {
                parse_cycle(text)?;
            }
        }
        Ok(definition)
    }
}

/// Resolve a definition into an absolute due date and remaining
/// repetitions, anchored at `base`.
pub(crate) fn resolve_due(
    definition: &TimerDefinition,
    base: DateTime<Utc>,
) -> Result<(DateTime<Utc>, Option<u32>), WheelError> {
    match definition {
        TimerDefinition::Date(text) => Ok((parse_date(text)?, None)),
        TimerDefinition::Duration(text) => {
            let duration = parse_duration(text)?;
            let delta = chrono::Duration::from_std(duration)
                .map_err(|_| WheelError::InvalidRequest(format!("duration out of range: {text}")))?;
            Ok((base + delta, None))
        }
        TimerDefinition::Cycle(text) => {
            let cycle = parse_cycle(text)?;
            let delta = chrono::Duration::from_std(cycle.interval)
                .map_err(|_| WheelError::InvalidRequest(format!("interval out of range: {text}")))?;
            Ok((base + delta, cycle.repetitions))
        }
    }
}

/// Event emitted when a timer fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerFired {
    pub timer_id: TimerId,
    pub element_id: String,
    pub token_id: TokenId,
    pub process_instance_id: InstanceId,
    pub timer_type: TimerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_context: Option<ProcessContext>,
    pub fired_at: DateTime<Utc>,
    #[serde(default)]
    pub variables: Variables,
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
