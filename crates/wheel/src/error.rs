// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timer scheduling errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WheelError {
    /// Malformed schedule request. Reported synchronously, never persisted.
    #[error("invalid timer request: {0}")]
    InvalidRequest(String),

    #[error("timer not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Iso8601(#[from] flow_core::Iso8601Error),

    #[error("storage error: {0}")]
    Store(#[from] flow_store::StoreError),
}
