// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Poll loop cadence configuration

use serde::{Deserialize, Serialize};

/// Timing of the poll loop and of the reconnection supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay between two poll cycles, in milliseconds (default: 100)
    pub interval_ms: u64,

    /// Delay while the link is down or a command is writing, in milliseconds (default: 200)
    pub backoff_ms: u64,

    /// Delay between two reconnection attempts, in milliseconds (default: 2000)
    pub reconnect_interval_ms: u64,

    /// Start polling as soon as the daemon is launched (default: true)
    pub autostart: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            backoff_ms: 200,
            reconnect_interval_ms: 2000,
            autostart: true,
        }
    }
}
