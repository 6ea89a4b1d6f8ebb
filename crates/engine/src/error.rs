// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("expression error: {0}")]
    Expression(String),

    #[error("process graph error: {0}")]
    Bpmn(String),

    #[error("timer error: {0}")]
    Timer(String),

    #[error("storage error: {0}")]
    Store(#[from] flow_store::StoreError),
}

impl From<flow_wheel::WheelError> for EngineError {
    fn from(e: flow_wheel::WheelError) -> Self {
        EngineError::Timer(e.to_string())
    }
}
