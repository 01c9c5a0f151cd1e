// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Poll engine
//!
//! The engine reads the whole register block in one transaction, decodes it
//! field by field in the order given by [`RegisterMap::fields`] and pushes
//! every value into the [`DeviceVariables`]. The application is best effort:
//! when decoding a field fails, the fields already applied in that cycle keep
//! their new values and the remaining ones are left untouched.
//!
//! A background loop repeats the cycle every `interval` while the link is
//! usable, and waits `backoff` while it is disconnected or a write session is
//! open. Poll failures are recorded and logged, never fatal. Each run owns its
//! own stop signal, so a loop that is still winding down can never be
//! confused with the next run.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time;

use super::variable::DeviceVariables;
use crate::modbus::{DecodeError, FieldBusLink, RegisterMap, TransportError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PollError {
    #[error("Block read failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Block decode failed: {0}")]
    Decode(#[from] DecodeError),
}

impl PollError {
    /// Whether the cycle never reached the device and should be retried after the backoff
    fn wants_backoff(&self) -> bool {
        matches!(
            self,
            PollError::Transport(TransportError::NotConnected | TransportError::WriteInProgress)
        )
    }
}

/// Loop cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Delay between two cycles on the normal path
    pub interval: Duration,
    /// Delay while disconnected or while a write is in progress
    pub backoff: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            backoff: Duration::from_millis(200),
        }
    }
}

/// Poll counters and the last failure, for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollStats {
    pub completed_cycles: u64,
    pub failed_cycles: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct PollDiagnostics {
    completed: AtomicU64,
    failed: AtomicU64,
    last_error: Mutex<Option<(String, DateTime<Utc>)>>,
}

impl PollDiagnostics {
    fn last_error(&self) -> MutexGuard<'_, Option<(String, DateTime<Utc>)>> {
        self.last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, result: &Result<(), PollError>) {
        match result {
            Ok(()) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                *self.last_error() = Some((e.to_string(), Utc::now()));
            }
        }
    }

    fn stats(&self) -> PollStats {
        let last = self.last_error().clone();
        PollStats {
            completed_cycles: self.completed.load(Ordering::Relaxed),
            failed_cycles: self.failed.load(Ordering::Relaxed),
            last_error_at: last.as_ref().map(|(_, at)| *at),
            last_error: last.map(|(message, _)| message),
        }
    }
}

/// Stop request of one loop run
#[derive(Default)]
struct StopSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        // notify_one stores a permit if the loop is not waiting yet
        self.notify.notify_one();
    }

    fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

struct RunHandle {
    signal: Arc<StopSignal>,
    task: JoinHandle<()>,
}

struct PollShared {
    link: Arc<FieldBusLink>,
    map: RegisterMap,
    variables: Arc<DeviceVariables>,
    timing: PollTiming,
    diagnostics: PollDiagnostics,
}

impl PollShared {
    async fn cycle(&self) -> Result<(), PollError> {
        let block = self
            .link
            .read_block(self.map.base_address(), self.map.block_length())
            .await?;

        for spec in self.map.fields() {
            let value = self.map.decode(spec, &block)?;
            if self.variables.apply(spec.field, value) {
                debug!("{:?} changed to {:?}", spec.field, value);
            }
        }
        Ok(())
    }

    async fn poll_once(&self) -> Result<(), PollError> {
        let result = self.cycle().await;
        self.diagnostics.record(&result);
        result
    }

    async fn run(self: Arc<Self>, signal: Arc<StopSignal>) {
        info!(
            "Polling started (interval {:?}, backoff {:?})",
            self.timing.interval, self.timing.backoff
        );

        while !signal.is_requested() {
            let delay = if !self.link.is_connected() || self.link.is_writing() {
                self.timing.backoff
            } else {
                match self.poll_once().await {
                    Ok(()) => self.timing.interval,
                    Err(e) if e.wants_backoff() => {
                        debug!("Poll cycle skipped: {}", e);
                        self.timing.backoff
                    }
                    Err(e) => {
                        warn!("Poll cycle abandoned: {}", e);
                        self.timing.interval
                    }
                }
            };

            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = signal.notify.notified() => {}
            }
        }

        info!("Polling stopped");
    }
}

pub struct PollEngine {
    shared: Arc<PollShared>,
    run: Mutex<Option<RunHandle>>,
}

impl PollEngine {
    pub fn new(
        link: Arc<FieldBusLink>,
        map: RegisterMap,
        variables: Arc<DeviceVariables>,
        timing: PollTiming,
    ) -> Self {
        Self {
            shared: Arc::new(PollShared {
                link,
                map,
                variables,
                timing,
                diagnostics: PollDiagnostics::default(),
            }),
            run: Mutex::new(None),
        }
    }

    fn run_slot(&self) -> MutexGuard<'_, Option<RunHandle>> {
        self.run.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn timing(&self) -> PollTiming {
        self.shared.timing
    }

    /// Spawn the poll loop on the current tokio runtime.
    ///
    /// Returns false, without spawning anything, when a loop is already running.
    /// After a [`stop`](Self::stop) the previous loop may still be inside a
    /// cycle; the new run waits for it to exit before its first poll, so two
    /// loops never feed the variables at once.
    pub fn start(&self) -> bool {
        let mut slot = self.run_slot();
        let previous = match slot.take() {
            Some(run) if !run.signal.is_requested() && !run.task.is_finished() => {
                debug!("Polling already running");
                *slot = Some(run);
                return false;
            }
            Some(run) if !run.task.is_finished() => Some(run.task),
            _ => None,
        };

        let signal = Arc::new(StopSignal::default());
        let shared = Arc::clone(&self.shared);
        let run_signal = Arc::clone(&signal);
        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                debug!("Waiting for the previous poll loop to exit");
                if let Err(e) = previous.await {
                    warn!("Previous poll task ended abnormally: {}", e);
                }
            }
            shared.run(run_signal).await;
        });
        *slot = Some(RunHandle { signal, task });
        true
    }

    /// Request the loop to stop; returns false when it was not running.
    ///
    /// The loop exits at its next wait, within one backoff interval unless a
    /// transport call is in flight. Its handle is kept until the next
    /// [`start`](Self::start) or [`shutdown`](Self::shutdown).
    pub fn stop(&self) -> bool {
        match self.run_slot().as_ref() {
            Some(run) if !run.signal.is_requested() => {
                let was_running = !run.task.is_finished();
                run.signal.request();
                was_running
            }
            _ => false,
        }
    }

    /// Stop the loop and wait for it to exit
    pub async fn shutdown(&self) {
        let run = self.run_slot().take();
        if let Some(run) = run {
            run.signal.request();
            if let Err(e) = run.task.await {
                warn!("Poll task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.run_slot()
            .as_ref()
            .map(|run| !run.signal.is_requested() && !run.task.is_finished())
            .unwrap_or(false)
    }

    /// Run a single poll cycle outside the loop
    pub async fn poll_once(&self) -> Result<(), PollError> {
        self.shared.poll_once().await
    }

    pub fn stats(&self) -> PollStats {
        self.shared.diagnostics.stats()
    }
}
