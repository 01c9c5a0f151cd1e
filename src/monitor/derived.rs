// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Counters and error log derived from flag transitions
//!
//! [`DerivedState`] subscribes to the outcome and alarm flags of a
//! [`DeviceVariables`] set. Only transitions *to* 1 are acted on:
//!
//! | Flag | Effect |
//! |------|--------|
//! | success | `good_count += 1`, counters persisted |
//! | fail | `fail_count += 1`, counters persisted, "Product rejected" logged |
//! | leak | "Leak detected" logged |
//! | over_pressure | "Over-pressure detected" logged |
//! | sensor_error | "Pressure sensor error" logged |
//! | setpoint_error | "Setpoint not reached" logged |
//!
//! Sink failures are logged and swallowed; the in-memory counters and
//! `log_count` stay authoritative.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info};
use serde::Serialize;

use super::variable::DeviceVariables;
use crate::persistence::{
    query_lines, CounterStore, Counters, ErrorLogEntry, ErrorLogSink, LogPage, LogQuery,
    PersistenceError,
};

pub const MSG_PRODUCT_REJECTED: &str = "Product rejected";
pub const MSG_LEAK: &str = "Leak detected";
pub const MSG_OVER_PRESSURE: &str = "Over-pressure detected";
pub const MSG_SENSOR_ERROR: &str = "Pressure sensor error";
pub const MSG_SETPOINT_ERROR: &str = "Setpoint not reached";

/// Counter values exposed to consumers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DerivedCounts {
    pub good_count: u64,
    pub fail_count: u64,
    pub log_count: u64,
}

struct DerivedInner {
    counters: Counters,
    log_count: u64,
    counter_store: Box<dyn CounterStore>,
    error_log: Box<dyn ErrorLogSink>,
}

impl DerivedInner {
    fn persist_counters(&mut self) {
        if let Err(e) = self.counter_store.save(&self.counters) {
            error!("Failed to persist counters: {}", e);
        }
    }

    fn log_error(&mut self, message: &str) {
        self.log_count += 1;
        info!("{}", message);
        if let Err(e) = self.error_log.append(&ErrorLogEntry::now(message)) {
            error!("Failed to append to the error log: {}", e);
        }
    }
}

pub struct DerivedState {
    inner: Mutex<DerivedInner>,
}

impl DerivedState {
    /// Build the state, reloading counters and the log entry count from the sinks.
    ///
    /// Load failures start the affected value from zero.
    pub fn load(mut counter_store: Box<dyn CounterStore>, error_log: Box<dyn ErrorLogSink>) -> Self {
        let counters = counter_store.load().unwrap_or_else(|e| {
            error!("Failed to load counters, starting from zero: {}", e);
            Counters::default()
        });
        let log_count = error_log.count_entries().unwrap_or_else(|e| {
            error!("Failed to count error log entries: {}", e);
            0
        });
        debug!(
            "Derived state loaded: good={} fail={} log={}",
            counters.good_count, counters.fail_count, log_count
        );

        Self {
            inner: Mutex::new(DerivedInner {
                counters,
                log_count,
                counter_store,
                error_log,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DerivedInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe to the outcome and alarm flags of `variables`
    pub fn attach(self: &Arc<Self>, variables: &DeviceVariables) {
        let state = Arc::clone(self);
        variables.success.subscribe(move |v| {
            if v == 1 {
                state.record_success();
            }
        });

        let state = Arc::clone(self);
        variables.fail.subscribe(move |v| {
            if v == 1 {
                state.record_failure();
            }
        });

        for (variable, message) in [
            (&variables.leak, MSG_LEAK),
            (&variables.over_pressure, MSG_OVER_PRESSURE),
            (&variables.sensor_error, MSG_SENSOR_ERROR),
            (&variables.setpoint_error, MSG_SETPOINT_ERROR),
        ] {
            let state = Arc::clone(self);
            variable.subscribe(move |v| {
                if v == 1 {
                    state.lock().log_error(message);
                }
            });
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        inner.counters.good_count += 1;
        inner.persist_counters();
    }

    fn record_failure(&self) {
        let mut inner = self.lock();
        inner.counters.fail_count += 1;
        inner.persist_counters();
        inner.log_error(MSG_PRODUCT_REJECTED);
    }

    pub fn counts(&self) -> DerivedCounts {
        let inner = self.lock();
        DerivedCounts {
            good_count: inner.counters.good_count,
            fail_count: inner.counters.fail_count,
            log_count: inner.log_count,
        }
    }

    /// Zero both counters and persist them
    pub fn reset_counters(&self) {
        let mut inner = self.lock();
        inner.counters = Counters::default();
        inner.persist_counters();
        info!("Counters reset");
    }

    /// Empty the error log; `log_count` is only zeroed if the sink was cleared
    pub fn clear_log(&self) -> Result<(), PersistenceError> {
        let mut inner = self.lock();
        inner.error_log.clear()?;
        inner.log_count = 0;
        info!("Error log cleared");
        Ok(())
    }

    pub fn query_log(&self, query: &LogQuery) -> Result<LogPage, PersistenceError> {
        let lines = self.lock().error_log.read_lines()?;
        Ok(query_lines(lines, query))
    }
}
