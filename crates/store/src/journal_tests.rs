// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::StoreConfig;
use serde_json::json;

fn open_temp() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::new(dir.path().join("db"));
    config.flush_every_ms = None;
    let store = Store::open(&config).unwrap();
    (dir, store)
}

#[test]
fn append_assigns_monotonic_sequences() {
    let (_dir, store) = open_temp();
    let journal = SystemJournal::open(store).unwrap();

    let s1 = journal.append(&json!({"type": "timer_fired"})).unwrap();
    let s2 = journal.append(&json!({"type": "job_completed"})).unwrap();
    assert!(s2 > s1);
}

#[test]
fn recent_returns_newest_entries_oldest_first() {
    let (_dir, store) = open_temp();
    let journal = SystemJournal::open(store).unwrap();

    for i in 0..5 {
        journal.append(&json!({"n": i})).unwrap();
    }

    let recent = journal.recent(2).unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].1["n"], 3);
    assert_eq!(recent[1].1["n"], 4);
}

#[test]
fn sequence_resumes_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::new(dir.path().join("db"));
    config.flush_every_ms = None;

    let last = {
        let store = Store::open(&config).unwrap();
        let journal = SystemJournal::open(store.clone()).unwrap();
        let mut last = 0;
        for _ in 0..3 {
            last = journal.append(&json!({})).unwrap();
        }
        store.flush().unwrap();
        last
    };

    let store = Store::open(&config).unwrap();
    let journal = SystemJournal::open(store).unwrap();
    let next = journal.append(&json!({})).unwrap();
    assert!(next > last);
}
