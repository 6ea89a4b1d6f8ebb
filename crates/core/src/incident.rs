// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable records of non-recoverable execution failures.

use crate::instance::InstanceId;
use crate::job::JobId;
use crate::token::TokenId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for an incident.
    pub struct IncidentId;
}

/// What subsystem raised the incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentKind {
    Job,
    Expression,
    Bpmn,
    Process,
    Timer,
    Message,
    System,
}

crate::simple_display! {
    IncidentKind {
        Job => "job",
        Expression => "expression",
        Bpmn => "bpmn",
        Process => "process",
        Timer => "timer",
        Message => "message",
        System => "system",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    Open,
    Resolved,
    Dismissed,
}

crate::simple_display! {
    IncidentStatus {
        Open => "open",
        Resolved => "resolved",
        Dismissed => "dismissed",
    }
}

/// An operator-facing failure record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub kind: IncidentKind,
    pub status: IncidentStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_instance_id: Option<InstanceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<TokenId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Incident {
    /// Open a new incident.
    pub fn open(kind: IncidentKind, message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: IncidentId::fresh(),
            kind,
            status: IncidentStatus::Open,
            message: message.into(),
            process_instance_id: None,
            element_id: None,
            token_id: None,
            job_id: None,
            created_at: now,
            resolved_at: None,
        }
    }

    pub fn with_instance(mut self, id: InstanceId) -> Self {
        self.process_instance_id = Some(id);
        self
    }

    pub fn with_element(mut self, id: impl Into<String>) -> Self {
        self.element_id = Some(id.into());
        self
    }

    pub fn with_token(mut self, id: TokenId) -> Self {
        self.token_id = Some(id);
        self
    }

    pub fn with_job(mut self, id: JobId) -> Self {
        self.job_id = Some(id);
        self
    }

    pub fn resolve(&mut self, now: DateTime<Utc>) {
        self.status = IncidentStatus::Resolved;
        self.resolved_at = Some(now);
    }
}

#[cfg(test)]
#[path = "incident_tests.rs"]
mod tests;
