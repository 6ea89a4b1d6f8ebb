// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Join-gateway synchronisation state.

use crate::instance::InstanceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Arrival bookkeeping for a joining gateway within one instance.
///
/// Arrivals are deduplicated by token ID and kept in arrival order, which
/// defines the last-write-wins variable merge at join completion. The
/// gateway is complete once the number of distinct arrivals reaches
/// `expected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewaySyncState {
    pub gateway_id: String,
    pub process_instance_id: InstanceId,
    pub expected: u32,
    #[serde(default)]
    pub arrived: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl GatewaySyncState {
    pub fn new(
        gateway_id: impl Into<String>,
        process_instance_id: InstanceId,
        expected: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            process_instance_id,
            expected,
            arrived: Vec::new(),
            created_at: now,
        }
    }

    /// Record an arriving token. Returns false for a duplicate arrival.
    pub fn record_arrival(&mut self, token_id: &str) -> bool {
        if self.arrived.iter().any(|id| id == token_id) {
            return false;
        }
        self.arrived.push(token_id.to_string());
        true
    }

    pub fn is_complete(&self) -> bool {
        self.arrived.len() as u32 >= self.expected
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
