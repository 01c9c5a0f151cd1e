// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! In-memory persistence sinks
//!
//! Clones share the same storage, so a test can hand one clone to the monitor
//! and inspect the other. Each sink can be switched into a failing mode to
//! exercise the best-effort durability path.

use std::sync::{Arc, Mutex, MutexGuard};

use super::{CounterStore, Counters, ErrorLogEntry, ErrorLogSink, PersistenceError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct CounterSlot {
    counters: Counters,
    saves: usize,
    failing: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCounterStore {
    slot: Arc<Mutex<CounterSlot>>,
}

impl MemoryCounterStore {
    pub fn with_counters(counters: Counters) -> Self {
        let store = Self::default();
        lock(&store.slot).counters = counters;
        store
    }

    /// Last successfully saved counters
    pub fn stored(&self) -> Counters {
        lock(&self.slot).counters
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        lock(&self.slot).saves
    }

    pub fn set_failing(&self, failing: bool) {
        lock(&self.slot).failing = failing;
    }
}

impl CounterStore for MemoryCounterStore {
    fn load(&mut self) -> Result<Counters, PersistenceError> {
        let slot = lock(&self.slot);
        if slot.failing {
            return Err(PersistenceError::Unavailable("counter store".to_string()));
        }
        Ok(slot.counters)
    }

    fn save(&mut self, counters: &Counters) -> Result<(), PersistenceError> {
        let mut slot = lock(&self.slot);
        if slot.failing {
            return Err(PersistenceError::Unavailable("counter store".to_string()));
        }
        slot.counters = *counters;
        slot.saves += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LogSlot {
    lines: Vec<String>,
    failing: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryErrorLog {
    slot: Arc<Mutex<LogSlot>>,
}

impl MemoryErrorLog {
    pub fn with_lines(lines: Vec<String>) -> Self {
        let log = Self::default();
        lock(&log.slot).lines = lines;
        log
    }

    pub fn lines(&self) -> Vec<String> {
        lock(&self.slot).lines.clone()
    }

    pub fn set_failing(&self, failing: bool) {
        lock(&self.slot).failing = failing;
    }
}

impl ErrorLogSink for MemoryErrorLog {
    fn append(&mut self, entry: &ErrorLogEntry) -> Result<(), PersistenceError> {
        let mut slot = lock(&self.slot);
        if slot.failing {
            return Err(PersistenceError::Unavailable("error log".to_string()));
        }
        slot.lines.push(entry.to_line());
        Ok(())
    }

    fn count_entries(&self) -> Result<u64, PersistenceError> {
        let slot = lock(&self.slot);
        if slot.failing {
            return Err(PersistenceError::Unavailable("error log".to_string()));
        }
        Ok(slot.lines.len() as u64)
    }

    fn clear(&mut self) -> Result<(), PersistenceError> {
        let mut slot = lock(&self.slot);
        if slot.failing {
            return Err(PersistenceError::Unavailable("error log".to_string()));
        }
        slot.lines.clear();
        Ok(())
    }

    fn read_lines(&self) -> Result<Vec<String>, PersistenceError> {
        let slot = lock(&self.slot);
        if slot.failing {
            return Err(PersistenceError::Unavailable("error log".to_string()));
        }
        Ok(slot.lines.clone())
    }
}
