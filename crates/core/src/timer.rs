// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted timer records.
//!
//! A timer keeps its original ISO-8601 definition alongside the computed
//! `due_date` so the wheel can recompute firing times after a restart.

use crate::instance::InstanceId;
use crate::token::TokenId;
use crate::vars::Variables;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a scheduled timer.
    pub struct TimerId;
}

/// Where in the process graph a timer originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerType {
    Start,
    Boundary,
    Event,
}

crate::simple_display! {
    TimerType {
        Start => "start",
        Boundary => "boundary",
        Event => "event",
    }
}

/// Timer lifecycle. Terminal states are never resurrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerState {
    Scheduled,
    Fired,
    Canceled,
}

impl TimerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TimerState::Fired | TimerState::Canceled)
    }
}

crate::simple_display! {
    TimerState {
        Scheduled => "scheduled",
        Fired => "fired",
        Canceled => "canceled",
    }
}

/// The original ISO-8601 form, needed for post-restart recomputation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TimerDefinition {
    /// Absolute date (`2026-08-01T12:00:00Z` or `2026-08-01`).
    Date(String),
    /// Duration from the schedule base time (`PT30S`).
    Duration(String),
    /// Repeating interval (`R3/PT1S`).
    Cycle(String),
}

impl TimerDefinition {
    pub fn text(&self) -> &str {
        match self {
            TimerDefinition::Date(s) | TimerDefinition::Duration(s) | TimerDefinition::Cycle(s) => {
                s
            }
        }
    }
}

/// Routing context carried through a timer into its fired callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessContext {
    pub process_key: String,
    /// Activity the timer's boundary event is attached to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_to_ref: Option<String>,
    /// Interrupting boundary timers cancel the activity on fire.
    #[serde(default)]
    pub cancel_activity: bool,
}

/// Persisted snapshot of a scheduled timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerRecord {
    pub id: TimerId,
    pub element_id: String,
    pub token_id: TokenId,
    pub process_instance_id: InstanceId,
    pub timer_type: TimerType,
    pub state: TimerState,
    pub definition: TimerDefinition,
    pub due_date: DateTime<Utc>,
    /// Base time the definition was resolved against; restore re-anchors
    /// duration and cycle definitions here.
    pub scheduled_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fired_at: Option<DateTime<Utc>>,
    /// Remaining repetitions of a cycle definition. `None` for non-cycles
    /// and infinite cycles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetitions_left: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_context: Option<ProcessContext>,
    #[serde(default)]
    pub variables: Variables,
}

impl TimerRecord {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

crate::builder! {
    pub struct TimerRecordBuilder => TimerRecord {
        into {
            element_id: String = "timer_event",
        }
        set {
            id: TimerId = TimerId::from_string("tmr-test"),
            token_id: TokenId = TokenId::from_string("tok-test"),
            process_instance_id: InstanceId = InstanceId::from_string("inst-test"),
            timer_type: TimerType = TimerType::Event,
            state: TimerState = TimerState::Scheduled,
            definition: TimerDefinition = TimerDefinition::Duration("PT30S".to_string()),
            variables: Variables = Variables::new(),
            due_date: chrono::DateTime<chrono::Utc> = chrono::Utc::now(),
            scheduled_at: chrono::DateTime<chrono::Utc> = chrono::Utc::now(),
        }
        option {
            fired_at: chrono::DateTime<chrono::Utc> = None,
            repetitions_left: u32 = None,
            process_context: ProcessContext = None,
        }
    }
}

#[cfg(test)]
#[path = "timer_tests.rs"]
mod tests;
