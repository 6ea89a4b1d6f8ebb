// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The hierarchical wheel data structure.
//!
//! Each level covers `tick × slots` of horizon; an entry lands in the
//! lowest level whose horizon contains its remaining delta. Level 0 is
//! drained slot-by-slot by the ticker; higher levels are walked by the
//! proactive cascade, which demotes entries as their deadlines come within
//! reach of a lower level and fires any it finds already overdue.

use chrono::{DateTime, Utc};
use flow_core::TimerRecord;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Tick interval and slot count of one wheel level.
#[derive(Debug, Clone, Copy)]
pub struct LevelSpec {
    pub tick: Duration,
    pub slots: usize,
}

impl LevelSpec {
    pub const fn horizon(&self) -> Duration {
        Duration::from_secs(self.tick.as_secs() * self.slots as u64)
    }
}

/// Default geometry: 1 s precision for a minute, out to roughly a century.
pub const DEFAULT_LEVELS: [LevelSpec; 5] = [
    LevelSpec { tick: Duration::from_secs(1), slots: 60 },
    LevelSpec { tick: Duration::from_secs(60), slots: 60 },
    LevelSpec { tick: Duration::from_secs(3_600), slots: 24 },
    LevelSpec { tick: Duration::from_secs(86_400), slots: 30 },
    LevelSpec { tick: Duration::from_secs(30 * 86_400), slots: 100 },
];

/// Stable location of an entry, kept in the `timer_id → location` index so
/// cancellation never scans slots.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    level: usize,
    slot: usize,
    seq: u64,
    due_date: DateTime<Utc>,
}

/// Slot lists are keyed by a monotonic insertion sequence, so iteration
/// order within a slot is FIFO.
struct LevelState {
    cursor: usize,
    slots: Vec<BTreeMap<u64, TimerRecord>>,
    count: usize,
}

struct Level {
    spec: LevelSpec,
    state: RwLock<LevelState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelStats {
    pub tick_secs: u64,
    pub slots: usize,
    pub cursor: usize,
    pub timers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WheelStats {
    pub levels: Vec<LevelStats>,
    pub total: usize,
}

pub struct TimingWheel {
    levels: Vec<Level>,
    // Lock order: index before level; a level lock is never held while
    // acquiring the index.
    index: Mutex<HashMap<String, Anchor>>,
    seq: AtomicU64,
}

impl TimingWheel {
    pub fn new(specs: &[LevelSpec]) -> Self {
        let levels = specs
            .iter()
            .map(|spec| Level {
                spec: *spec,
                state: RwLock::new(LevelState {
                    cursor: 0,
                    slots: (0..spec.slots).map(|_| BTreeMap::new()).collect(),
                    count: 0,
                }),
            })
            .collect();
        Self { levels, index: Mutex::new(HashMap::new()), seq: AtomicU64::new(0) }
    }

    pub fn with_default_levels() -> Self {
        Self::new(&DEFAULT_LEVELS)
    }

    /// Level 0 tick interval, the resolution of the whole wheel.
    pub fn tick_interval(&self) -> Duration {
        self.levels[0].spec.tick
    }

    /// The lowest level whose horizon covers `delta`.
    fn level_for(&self, delta: Duration) -> usize {
        for (i, level) in self.levels.iter().enumerate() {
            if delta < level.spec.horizon() {
                return i;
            }
        }
        self.levels.len() - 1
    }

    /// Place a record into the wheel relative to `now`.
    pub fn insert(&self, record: TimerRecord, now: DateTime<Utc>) {
        let delta = (record.due_date - now).to_std().unwrap_or(Duration::ZERO);
        let level_idx = self.level_for(delta);
        let id = record.id.as_str().to_string();
        let due_date = record.due_date;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);

        let mut index = self.index.lock();
        let level = &self.levels[level_idx];
        let mut state = level.state.write();
        let tick_ms = level.spec.tick.as_millis().max(1);
        // The cursor points at the slot drained by the most recent tick, so
        // an entry is always placed at least one tick ahead; never further
        // than one full revolution.
        let ticks = ((delta.as_millis() / tick_ms) as usize).clamp(1, level.spec.slots - 1);
        let slot = (state.cursor + ticks) % level.spec.slots;
        state.slots[slot].insert(seq, record);
        state.count += 1;
        index.insert(id, Anchor { level: level_idx, slot, seq, due_date });
    }

    /// Remove a timer. Returns false when it was not in the wheel (already
    /// fired, already cancelled, or never scheduled here).
    pub fn cancel(&self, timer_id: &str) -> bool {
        let mut index = self.index.lock();
        let Some(anchor) = index.remove(timer_id) else {
            return false;
        };
        let mut state = self.levels[anchor.level].state.write();
        if state.slots[anchor.slot].remove(&anchor.seq).is_some() {
            state.count -= 1;
            true
        } else {
            false
        }
    }

    /// Time until the timer fires, negative when overdue.
    pub fn remaining(&self, timer_id: &str, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.index.lock().get(timer_id).map(|anchor| anchor.due_date - now)
    }

    pub fn contains(&self, timer_id: &str) -> bool {
        self.index.lock().contains_key(timer_id)
    }

    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advance one tick: drain the current level-0 slot, then cascade.
    ///
    /// Returns every record whose due date has elapsed, in slot order.
    /// Entries drained but not yet due are re-inserted closer to their
    /// firing slot; cascaded entries demote one or more levels down.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<TimerRecord> {
        let mut fired = Vec::new();
        let mut requeue = Vec::new();

        {
            let mut state = self.levels[0].state.write();
            let cursor = (state.cursor + 1) % state.slots.len();
            state.cursor = cursor;
            let drained = std::mem::take(&mut state.slots[cursor]);
            state.count -= drained.len();
            for (_, record) in drained {
                if record.due_date <= now {
                    fired.push(record);
                } else {
                    requeue.push(record);
                }
            }
        }

        {
            let mut index = self.index.lock();
            for record in fired.iter().chain(requeue.iter()) {
                index.remove(record.id.as_str());
            }
        }
        for record in requeue {
            self.insert(record, now);
        }

        // Proactive cascade: demote entries whose delta now fits lower,
        // firing any found overdue.
        for level_idx in 1..self.levels.len() {
            let demoted = self.drain_demotable(level_idx, now);
            if demoted.is_empty() {
                continue;
            }
            {
                let mut index = self.index.lock();
                for record in &demoted {
                    index.remove(record.id.as_str());
                }
            }
            for record in demoted {
                if record.due_date <= now {
                    fired.push(record);
                } else {
                    self.insert(record, now);
                }
            }
        }

        fired
    }

    fn drain_demotable(&self, level_idx: usize, now: DateTime<Utc>) -> Vec<TimerRecord> {
        let mut state = self.levels[level_idx].state.write();
        let mut demoted = Vec::new();
        for slot in state.slots.iter_mut() {
            let move_out: Vec<u64> = slot
                .iter()
                .filter(|(_, record)| {
                    let delta = (record.due_date - now).to_std().unwrap_or(Duration::ZERO);
                    self.level_for(delta) < level_idx
                })
                .map(|(seq, _)| *seq)
                .collect();
            for seq in move_out {
                if let Some(record) = slot.remove(&seq) {
                    demoted.push(record);
                }
            }
        }
        state.count -= demoted.len();
        demoted
    }

    pub fn stats(&self) -> WheelStats {
        let levels: Vec<LevelStats> = self
            .levels
            .iter()
            .map(|level| {
                let state = level.state.read();
                LevelStats {
                    tick_secs: level.spec.tick.as_secs(),
                    slots: level.spec.slots,
                    cursor: state.cursor,
                    timers: state.count,
                }
            })
            .collect();
        let total = levels.iter().map(|l| l.timers).sum();
        WheelStats { levels, total }
    }
}

#[cfg(test)]
#[path = "wheel_tests.rs"]
mod tests;
