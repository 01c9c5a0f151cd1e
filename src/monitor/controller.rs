// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Device controller context
//!
//! [`DeviceController`] wires one field-bus link, the variable set, the
//! derived counters, the poll engine and the command port together. It is
//! built once at startup and shared by reference (usually inside an `Arc`)
//! with every consumer; [`DeviceController::shutdown`] tears it down.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;

use super::commands::CommandPort;
use super::derived::{DerivedCounts, DerivedState};
use super::engine::{PollEngine, PollError, PollStats, PollTiming};
use super::variable::{DeviceVariables, VariablesSnapshot};
use crate::config::Config;
use crate::modbus::{FieldBusLink, FieldBusTransport, RegisterMap, TcpTransport, TransportError};
use crate::persistence::{
    CounterStore, ErrorLogSink, FileCounterStore, FileErrorLog, LogPage, LogQuery,
    PersistenceError,
};

/// Read-only view of the controller handed to consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub connected: bool,
    /// Whole seconds since the link went down, 0 while connected
    pub disconnected_for_secs: u64,
    pub polling: bool,
    pub writing: bool,
    pub variables: VariablesSnapshot,
    #[serde(flatten)]
    pub counts: DerivedCounts,
    pub poll: PollStats,
}

pub struct DeviceController {
    map: RegisterMap,
    link: Arc<FieldBusLink>,
    variables: Arc<DeviceVariables>,
    derived: Arc<DerivedState>,
    engine: PollEngine,
    commands: CommandPort,
}

impl DeviceController {
    pub fn new(
        map: RegisterMap,
        unit_id: u8,
        timing: PollTiming,
        transport: Box<dyn FieldBusTransport>,
        counter_store: Box<dyn CounterStore>,
        error_log: Box<dyn ErrorLogSink>,
    ) -> Self {
        Self::assemble(map, unit_id, timing, transport, counter_store, error_log, true)
    }

    /// Controller whose polls never touch the counters or the error log.
    ///
    /// A fresh variable set reports every flag already at 1 as a transition
    /// on its first poll, so one-off reads must not feed [`DerivedState`].
    /// Stored counts are still loaded for the snapshot.
    pub fn observer(
        map: RegisterMap,
        unit_id: u8,
        timing: PollTiming,
        transport: Box<dyn FieldBusTransport>,
        counter_store: Box<dyn CounterStore>,
        error_log: Box<dyn ErrorLogSink>,
    ) -> Self {
        Self::assemble(map, unit_id, timing, transport, counter_store, error_log, false)
    }

    fn assemble(
        map: RegisterMap,
        unit_id: u8,
        timing: PollTiming,
        transport: Box<dyn FieldBusTransport>,
        counter_store: Box<dyn CounterStore>,
        error_log: Box<dyn ErrorLogSink>,
        track_transitions: bool,
    ) -> Self {
        let link = Arc::new(FieldBusLink::new(transport, unit_id));
        let variables = Arc::new(DeviceVariables::new());
        let derived = Arc::new(DerivedState::load(counter_store, error_log));
        if track_transitions {
            derived.attach(&variables);
        }

        let engine = PollEngine::new(Arc::clone(&link), map, Arc::clone(&variables), timing);
        let commands = CommandPort::new(Arc::clone(&link), map, Arc::clone(&derived));

        Self {
            map,
            link,
            variables,
            derived,
            engine,
            commands,
        }
    }

    /// Controller over Modbus TCP with file-backed counters and error log
    pub fn from_config(config: &Config) -> Self {
        Self::configured(config, true)
    }

    /// Same wiring as [`DeviceController::from_config`], built as an [`observer`](Self::observer)
    pub fn observer_from_config(config: &Config) -> Self {
        Self::configured(config, false)
    }

    fn configured(config: &Config, track_transitions: bool) -> Self {
        let device = &config.device;
        let transport = TcpTransport::new(
            device.address.clone(),
            device.port,
            Duration::from_millis(device.connect_timeout_ms),
            Duration::from_millis(device.request_timeout_ms),
        );
        info!(
            "Monitoring unit {} at {} from holding register {}",
            device.unit_id,
            transport.endpoint(),
            device.base_address
        );

        Self::assemble(
            RegisterMap::new(device.base_address),
            device.unit_id,
            PollTiming {
                interval: Duration::from_millis(config.polling.interval_ms),
                backoff: Duration::from_millis(config.polling.backoff_ms),
            },
            Box::new(transport),
            Box::new(FileCounterStore::new(&config.storage.counters_file)),
            Box::new(FileErrorLog::new(&config.storage.error_log_file)),
            track_transitions,
        )
    }

    pub fn map(&self) -> &RegisterMap {
        &self.map
    }

    pub fn variables(&self) -> &DeviceVariables {
        &self.variables
    }

    pub fn link(&self) -> &FieldBusLink {
        &self.link
    }

    pub async fn connect(&self) -> Result<(), TransportError> {
        self.link.connect().await
    }

    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.link.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn start_monitoring(&self) -> bool {
        self.engine.start()
    }

    pub fn stop_monitoring(&self) -> bool {
        self.engine.stop()
    }

    pub fn is_monitoring(&self) -> bool {
        self.engine.is_running()
    }

    pub async fn poll_once(&self) -> Result<(), PollError> {
        self.engine.poll_once().await
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        let now = Utc::now();
        let disconnected_for_secs = match self.link.disconnected_since() {
            Some(since) if !self.link.is_connected() => {
                (now - since).num_seconds().max(0) as u64
            }
            _ => 0,
        };

        DeviceSnapshot {
            timestamp: now,
            connected: self.link.is_connected(),
            disconnected_for_secs,
            polling: self.engine.is_running(),
            writing: self.link.is_writing(),
            variables: self.variables.snapshot(),
            counts: self.derived.counts(),
            poll: self.engine.stats(),
        }
    }

    pub async fn start(&self) -> Result<(), TransportError> {
        self.commands.start().await
    }

    pub async fn stop(&self) -> Result<(), TransportError> {
        self.commands.stop().await
    }

    pub async fn set_setpoint(&self, value: f32) -> Result<(), TransportError> {
        self.commands.set_setpoint(value).await
    }

    pub async fn reset_status(&self) -> Result<(), TransportError> {
        self.commands.reset_status().await
    }

    pub async fn reset_all(&self) -> Result<(), TransportError> {
        self.commands.reset_all().await
    }

    pub fn clear_logs(&self) -> Result<(), PersistenceError> {
        self.derived.clear_log()
    }

    pub fn query_logs(&self, query: &LogQuery) -> Result<LogPage, PersistenceError> {
        self.derived.query_log(query)
    }

    /// Stop polling, wait for the loop to exit and close the link
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
        if let Err(e) = self.link.disconnect().await {
            warn!("Error while closing the field bus link: {}", e);
        }
        info!("Device controller shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::{Field, MockDeviceTransport, RegisterBank};
    use crate::persistence::{Counters, MemoryCounterStore, MemoryErrorLog};
    use std::sync::atomic::Ordering;

    struct Bench {
        controller: DeviceController,
        bank: RegisterBank,
        online: Arc<std::sync::atomic::AtomicBool>,
        store: MemoryCounterStore,
        log: MemoryErrorLog,
    }

    fn bench() -> Bench {
        let map = RegisterMap::default();
        let bank = RegisterBank::for_map(&map);
        let transport = MockDeviceTransport::new(bank.clone());
        let online = transport.online_switch();
        let store = MemoryCounterStore::default();
        let log = MemoryErrorLog::default();
        let controller = DeviceController::new(
            map,
            1,
            PollTiming {
                interval: Duration::from_millis(5),
                backoff: Duration::from_millis(10),
            },
            Box::new(transport),
            Box::new(store.clone()),
            Box::new(log.clone()),
        );
        Bench {
            controller,
            bank,
            online,
            store,
            log,
        }
    }

    #[tokio::test]
    async fn commands_round_trip_through_the_device() {
        let b = bench();
        b.controller.connect().await.unwrap();

        b.controller.set_setpoint(6.0).await.unwrap();
        b.controller.start().await.unwrap();
        b.controller.poll_once().await.unwrap();

        let snapshot = b.controller.snapshot();
        assert!(snapshot.connected);
        assert_eq!(snapshot.disconnected_for_secs, 0);
        assert_eq!(snapshot.variables.start.value, 1);
        assert_eq!(snapshot.variables.stop.value, 0);
        assert_eq!(snapshot.variables.setpoint.value, 6.0);
        assert!(snapshot.variables.pressure.has_value);

        b.controller.reset_all().await.unwrap();
        assert_eq!(b.bank.read(16384, 4).unwrap(), vec![0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn device_outcomes_drive_the_counters() {
        let b = bench();
        let map = *b.controller.map();
        b.controller.connect().await.unwrap();
        b.controller.poll_once().await.unwrap();

        b.bank.set(map.address_of(Field::Success), 1);
        b.controller.poll_once().await.unwrap();
        b.bank.set(map.address_of(Field::Success), 0);
        b.bank.set(map.address_of(Field::Fail), 1);
        b.bank.set(map.address_of(Field::Leak), 1);
        b.controller.poll_once().await.unwrap();

        let counts = b.controller.snapshot().counts;
        assert_eq!(counts.good_count, 1);
        assert_eq!(counts.fail_count, 1);
        assert_eq!(counts.log_count, 2);
        assert_eq!(b.store.stored().good_count, 1);

        let page = b.controller.query_logs(&LogQuery::default()).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(b.log.lines().len(), 2);

        b.controller.reset_status().await.unwrap();
        b.controller.clear_logs().unwrap();
        let counts = b.controller.snapshot().counts;
        assert_eq!(counts, DerivedCounts::default());
    }

    #[tokio::test]
    async fn observer_polls_leave_latched_outcomes_uncounted() {
        let map = RegisterMap::default();
        let bank = RegisterBank::for_map(&map);
        bank.set(map.address_of(Field::Fail), 1);
        bank.set(map.address_of(Field::Success), 1);
        bank.set(map.address_of(Field::Leak), 1);
        let store = MemoryCounterStore::with_counters(Counters {
            good_count: 4,
            fail_count: 2,
        });
        let log = MemoryErrorLog::default();

        for _ in 0..2 {
            let controller = DeviceController::observer(
                map,
                1,
                PollTiming::default(),
                Box::new(MockDeviceTransport::new(bank.clone())),
                Box::new(store.clone()),
                Box::new(log.clone()),
            );
            controller.connect().await.unwrap();
            controller.poll_once().await.unwrap();

            let snapshot = controller.snapshot();
            assert_eq!(snapshot.variables.fail.value, 1);
            assert_eq!(snapshot.counts.good_count, 4);
            assert_eq!(snapshot.counts.fail_count, 2);
            assert_eq!(snapshot.counts.log_count, 0);
        }

        assert_eq!(store.save_count(), 0);
        assert!(log.lines().is_empty());
    }

    #[tokio::test]
    async fn lost_link_is_reported_in_the_snapshot() {
        let b = bench();
        b.controller.connect().await.unwrap();
        b.online.store(false, Ordering::SeqCst);

        assert!(b.controller.poll_once().await.is_err());
        let snapshot = b.controller.snapshot();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.poll.failed_cycles, 1);
        assert!(snapshot.poll.last_error.is_some());

        assert_eq!(
            b.controller.start().await,
            Err(TransportError::NotConnected)
        );

        b.online.store(true, Ordering::SeqCst);
        b.controller.connect().await.unwrap();
        assert_eq!(b.controller.snapshot().disconnected_for_secs, 0);
    }

    #[tokio::test]
    async fn snapshot_serialises_flat_counters() {
        let b = bench();
        let json = serde_json::to_value(b.controller.snapshot()).unwrap();
        assert_eq!(json["good_count"], 0);
        assert_eq!(json["log_count"], 0);
        assert_eq!(json["connected"], false);
        assert_eq!(json["variables"]["pressure"]["has_value"], false);
    }

    #[tokio::test]
    async fn shutdown_stops_polling_and_closes_the_link() {
        let b = bench();
        b.controller.connect().await.unwrap();
        assert!(b.controller.start_monitoring());
        assert!(b.controller.is_monitoring());

        b.controller.shutdown().await;
        assert!(!b.controller.is_monitoring());
        assert!(!b.controller.is_connected());
    }
}
