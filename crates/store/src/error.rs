// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage error taxonomy.

use thiserror::Error;

/// Errors that can occur in storage operations.
///
/// `NotFound` is a distinct kind so callers can treat missing keys as
/// ordinary control flow; everything else is surfaced for retry or
/// escalation. Batches are all-or-nothing.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("batch rejected: {0}")]
    BatchTooLarge(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
