// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request/response envelopes exchanged between components.
//!
//! Wire format: `{type, payload}` in, `{type, request_id, success,
//! result|error}` out. Payloads are opaque JSON; the receiving component
//! deserialises into its own request type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A command sent to a component's request channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub payload: Value,
}

impl RequestEnvelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self { kind: kind.into(), request_id: None, payload }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// An event emitted on a component's response channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseEnvelope {
    pub fn ok(kind: impl Into<String>, request_id: Option<String>, result: Value) -> Self {
        Self {
            kind: kind.into(),
            request_id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(kind: impl Into<String>, request_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            request_id,
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
