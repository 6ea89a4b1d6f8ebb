// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound work units consumed by external workers.

use crate::instance::InstanceId;
use crate::token::TokenId;
use crate::vars::Variables;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

crate::define_id! {
    /// Unique identifier for a job.
    pub struct JobId;
}

/// Variable key carrying the owning token's ID through worker round-trips.
///
/// Injected into the job's variable snapshot at creation and must survive
/// serialisation; completion callbacks use it to locate the waiting token.
pub const TOKEN_ID_VAR: &str = "_tokenID";

/// Job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
    /// Failed with retries remaining; re-eligible for activation once
    /// `scheduled_at` has passed.
    Deferred,
    /// Handed off to another node.
    Transferred,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled | JobStatus::Transferred
        )
    }
}

crate::simple_display! {
    JobStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Canceled => "canceled",
        Deferred => "deferred",
        Transferred => "transferred",
    }
}

/// An outbound work unit owned by a process instance.
///
/// The job has no lifetime dependency on its token: completion callbacks
/// must treat a vanished token as a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// Remaining retries.
    pub retries: u32,
    pub max_retries: u32,
    pub process_instance_id: InstanceId,
    pub element_id: String,
    pub token_id: TokenId,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Earliest activation time for a deferred job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Job {
    /// Create a pending job. The owning token's ID is injected into the
    /// variable snapshot under [`TOKEN_ID_VAR`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: JobId,
        job_type: impl Into<String>,
        process_instance_id: InstanceId,
        element_id: impl Into<String>,
        token_id: TokenId,
        headers: HashMap<String, String>,
        mut variables: Variables,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        variables.insert(
            TOKEN_ID_VAR.to_string(),
            serde_json::Value::String(token_id.as_str().to_string()),
        );
        Self {
            id,
            job_type: job_type.into(),
            status: JobStatus::Pending,
            worker_id: None,
            retries: max_retries,
            max_retries,
            process_instance_id,
            element_id: element_id.into(),
            token_id,
            headers,
            variables,
            priority: 0,
            created_at: now,
            started_at: None,
            scheduled_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Zero-based attempt index, used as the backoff exponent.
    pub fn attempt(&self) -> u32 {
        self.max_retries.saturating_sub(self.retries)
    }

    /// The owning token's ID as recorded in the variable snapshot.
    pub fn token_id_var(&self) -> Option<&str> {
        self.variables.get(TOKEN_ID_VAR).and_then(|v| v.as_str())
    }
}

crate::builder! {
    pub struct JobBuilder => Job {
        into {
            job_type: String = "payment",
            element_id: String = "task1",
        }
        set {
            id: JobId = JobId::from_string("job-test"),
            status: JobStatus = JobStatus::Pending,
            retries: u32 = 3,
            max_retries: u32 = 3,
            process_instance_id: InstanceId = InstanceId::from_string("inst-test"),
            token_id: TokenId = TokenId::from_string("tok-test"),
            headers: HashMap<String, String> = HashMap::new(),
            variables: Variables = Variables::new(),
            priority: i32 = 0,
        }
        option {
            worker_id: String = None,
            started_at: chrono::DateTime<chrono::Utc> = None,
            scheduled_at: chrono::DateTime<chrono::Utc> = None,
            completed_at: chrono::DateTime<chrono::Utc> = None,
            error_message: String = None,
        }
        computed {
            created_at: chrono::DateTime<chrono::Utc> = chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
