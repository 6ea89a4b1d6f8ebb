// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keyed async mutexes serialising execution per token.
//!
//! A token is never executed by two workers concurrently; everything that
//! mutates a token acquires its key first. Entries are reference-counted
//! and dropped once the last guard releases, so the map does not grow with
//! the number of tokens ever seen.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub(crate) struct KeyedLocks {
    entries: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

pub(crate) struct KeyedGuard {
    _permit: tokio::sync::OwnedMutexGuard<()>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> KeyedGuard {
        let entry = {
            let mut entries = self.entries.lock();
            Arc::clone(entries.entry(key.to_string()).or_default())
        };
        // The owned guard keeps its Arc alive, so a held or awaited lock
        // always has a strong count above the map's own reference.
        let permit = entry.lock_owned().await;

        // Opportunistic cleanup of idle entries.
        self.entries.lock().retain(|_, lock| Arc::strong_count(lock) > 1);
        KeyedGuard { _permit: permit }
    }
}

#[cfg(test)]
#[path = "locks_tests.rs"]
mod tests;
