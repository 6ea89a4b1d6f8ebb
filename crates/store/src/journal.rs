// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only journal of response events under `system_events:`.
//!
//! The kernel appends every routed response here for audit and debugging.
//! Sequence numbers are monotonic per store and resume from the highest
//! persisted entry after a restart.

use crate::error::StoreError;
use crate::keys;
use crate::kv::Store;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct SystemJournal {
    store: Store,
    next_seq: AtomicU64,
}

impl SystemJournal {
    /// Open the journal, resuming the sequence after the last entry.
    pub fn open(store: Store) -> Result<Self, StoreError> {
        let mut last_seq = 0u64;
        store.iterate(keys::SYSTEM_EVENT_PREFIX, |key, _| {
            if let Some(seq) = key
                .strip_prefix(keys::SYSTEM_EVENT_PREFIX)
                .and_then(|s| s.parse::<u64>().ok())
            {
                last_seq = last_seq.max(seq);
            }
            true
        })?;
        Ok(Self { store, next_seq: AtomicU64::new(last_seq + 1) })
    }

    /// Append an event, returning its sequence number.
    pub fn append(&self, event: &Value) -> Result<u64, StoreError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.store.put_json(&keys::system_event(seq), event)?;
        Ok(seq)
    }

    /// The most recent `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<(u64, Value)>, StoreError> {
        let mut entries: Vec<(u64, Value)> = Vec::new();
        self.store.iterate(keys::SYSTEM_EVENT_PREFIX, |key, value| {
            let seq = key
                .strip_prefix(keys::SYSTEM_EVENT_PREFIX)
                .and_then(|s| s.parse::<u64>().ok());
            if let (Some(seq), Ok(event)) = (seq, serde_json::from_slice(value)) {
                entries.push((seq, event));
            }
            true
        })?;
        if entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
        Ok(entries)
    }
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
