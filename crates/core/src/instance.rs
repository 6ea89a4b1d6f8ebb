// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process instance identifier and lifecycle.

use crate::vars::Variables;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

crate::define_id! {
    /// Unique identifier for a process instance.
    pub struct InstanceId;
}

/// Lifecycle state of a process instance.
///
/// `Messages` is the parked state of an instance whose start event carries a
/// `messageEventDefinition`: it owns no tokens, only a permanent
/// subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    Active,
    Messages,
    Completed,
    Canceled,
    Failed,
    Suspended,
}

impl InstanceState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceState::Completed | InstanceState::Canceled | InstanceState::Failed
        )
    }
}

crate::simple_display! {
    InstanceState {
        Active => "active",
        Messages => "messages",
        Completed => "completed",
        Canceled => "canceled",
        Failed => "failed",
        Suspended => "suspended",
    }
}

/// A running enactment of a process definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub id: InstanceId,
    pub process_key: String,
    pub version: u32,
    pub state: InstanceState,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// Parent token awaiting this instance, when spawned by a call activity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_token_id: Option<crate::token::TokenId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProcessInstance {
    pub fn new(
        id: InstanceId,
        process_key: impl Into<String>,
        version: u32,
        variables: Variables,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            process_key: process_key.into(),
            version,
            state: InstanceState::Active,
            variables,
            metadata: HashMap::new(),
            parent_token_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Transition to a new state. Terminal transitions stamp `completed_at`.
    pub fn transition(&mut self, state: InstanceState, now: DateTime<Utc>) {
        self.state = state;
        self.updated_at = now;
        if state.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
    }
}

crate::builder! {
    pub struct ProcessInstanceBuilder => ProcessInstance {
        into {
            process_key: String = "order",
        }
        set {
            id: InstanceId = InstanceId::from_string("inst-test"),
            version: u32 = 1,
            state: InstanceState = InstanceState::Active,
            variables: Variables = Variables::new(),
            metadata: HashMap<String, String> = HashMap::new(),
        }
        option {
            parent_token_id: crate::token::TokenId = None,
            completed_at: chrono::DateTime<chrono::Utc> = None,
        }
        computed {
            created_at: chrono::DateTime<chrono::Utc> = chrono::Utc::now(),
            updated_at: chrono::DateTime<chrono::Utc> = chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
