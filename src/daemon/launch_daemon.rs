// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::Result;
use log::{debug, info, warn};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::Config;
use crate::monitor::DeviceController;

/// Interval between two heartbeat status lines
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Represents the background tasks supervising one device controller
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    wakeup: watch::Sender<bool>,
    controller: Option<Arc<DeviceController>>,
    heartbeat_interval: Duration,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleep for `delay` unless the daemon is shut down first
async fn pause(wakeup: &mut watch::Receiver<bool>, delay: Duration) {
    tokio::select! {
        _ = time::sleep(delay) => {}
        _ = wakeup.changed() => {}
    }
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new() -> Self {
        let (wakeup, _) = watch::channel(false);
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            wakeup,
            controller: None,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Launch connection supervision, polling and the heartbeat for `controller`
    pub async fn launch(
        &mut self,
        config: &Config,
        controller: Arc<DeviceController>,
    ) -> Result<()> {
        self.start_connection_supervisor(
            Arc::clone(&controller),
            Duration::from_millis(config.polling.reconnect_interval_ms),
        )?;

        if config.polling.autostart {
            info!("Starting register polling");
            controller.start_monitoring();
        } else {
            info!("Polling autostart disabled, waiting for an explicit start");
        }

        self.start_heartbeat(Arc::clone(&controller))?;
        self.controller = Some(controller);

        Ok(())
    }

    /// Keep the field-bus link up, retrying every `retry` while it is down
    fn start_connection_supervisor(
        &mut self,
        controller: Arc<DeviceController>,
        retry: Duration,
    ) -> Result<()> {
        debug!("Starting connection supervisor (retry every {:?})", retry);

        let running = self.running.clone();
        let mut wakeup = self.wakeup.subscribe();
        let task = tokio::spawn(async move {
            let mut attempts: u64 = 0;
            while running.load(Ordering::SeqCst) {
                if !controller.is_connected() {
                    attempts += 1;
                    match controller.connect().await {
                        Ok(()) => {
                            info!("Connected to controller after {} attempt(s)", attempts);
                            attempts = 0;
                        }
                        Err(e) => {
                            let down_for = controller.snapshot().disconnected_for_secs;
                            warn!(
                                "Connection attempt {} failed ({}s offline): {}",
                                attempts, down_for, e
                            );
                        }
                    }
                }
                pause(&mut wakeup, retry).await;
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Start a heartbeat task that logs the device status periodically
    fn start_heartbeat(&mut self, controller: Arc<DeviceController>) -> Result<()> {
        debug!("Starting heartbeat monitor");

        let running = self.running.clone();
        let mut wakeup = self.wakeup.subscribe();
        let interval = self.heartbeat_interval;
        let task = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                let s = controller.snapshot();
                info!(
                    "Heartbeat: connected={} polling={} pressure={:.3} setpoint={:.3} good={} fail={} errors={} cycles={}/{}",
                    s.connected,
                    s.polling,
                    s.variables.pressure.value,
                    s.variables.setpoint.value,
                    s.counts.good_count,
                    s.counts.fail_count,
                    s.counts.log_count,
                    s.poll.completed_cycles,
                    s.poll.completed_cycles + s.poll.failed_cycles,
                );
                pause(&mut wakeup, interval).await;
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Stop all running tasks
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
        self.wakeup.send_replace(true);
    }

    /// Wait for all tasks to complete, then shut the controller down
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            match task.await {
                Ok(Err(e)) => log::error!("Task failed: {}", e),
                Err(e) => log::error!("Task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        if let Some(controller) = self.controller {
            controller.shutdown().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::{MockDeviceTransport, RegisterBank, RegisterMap};
    use crate::monitor::PollTiming;
    use crate::persistence::{MemoryCounterStore, MemoryErrorLog};

    fn controller(online: bool) -> Arc<DeviceController> {
        let map = RegisterMap::default();
        let transport = MockDeviceTransport::new(RegisterBank::for_map(&map));
        transport.online_switch().store(online, Ordering::SeqCst);
        Arc::new(DeviceController::new(
            map,
            1,
            PollTiming {
                interval: Duration::from_millis(5),
                backoff: Duration::from_millis(10),
            },
            Box::new(transport),
            Box::new(MemoryCounterStore::default()),
            Box::new(MemoryErrorLog::default()),
        ))
    }

    fn fast_config(autostart: bool) -> Config {
        let mut config = Config::default();
        config.polling.reconnect_interval_ms = 10;
        config.polling.autostart = autostart;
        config
    }

    async fn wait_for(cond: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn daemon_connects_polls_and_shuts_down() {
        let controller = controller(true);
        let mut daemon = Daemon::new().with_heartbeat_interval(Duration::from_millis(20));
        daemon
            .launch(&fast_config(true), Arc::clone(&controller))
            .await
            .unwrap();

        assert!(wait_for(|| controller.snapshot().poll.completed_cycles > 0).await);
        assert!(controller.is_monitoring());

        daemon.shutdown();
        time::timeout(Duration::from_secs(2), daemon.join())
            .await
            .unwrap()
            .unwrap();
        assert!(!controller.is_monitoring());
        assert!(!controller.is_connected());
    }

    #[tokio::test]
    async fn polling_waits_for_an_explicit_start_without_autostart() {
        let controller = controller(true);
        let mut daemon = Daemon::new();
        daemon
            .launch(&fast_config(false), Arc::clone(&controller))
            .await
            .unwrap();

        assert!(wait_for(|| controller.is_connected()).await);
        assert!(!controller.is_monitoring());

        daemon.shutdown();
        daemon.join().await.unwrap();
    }

    #[tokio::test]
    async fn offline_device_keeps_the_supervisor_retrying() {
        let controller = controller(false);
        let mut daemon = Daemon::new();
        daemon
            .launch(&fast_config(true), Arc::clone(&controller))
            .await
            .unwrap();

        time::sleep(Duration::from_millis(50)).await;
        assert!(!controller.is_connected());
        assert!(controller.is_monitoring());

        daemon.shutdown();
        time::timeout(Duration::from_secs(2), daemon.join())
            .await
            .unwrap()
            .unwrap();
    }
}
