// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Controller endpoint configuration
//!
//! This module defines where the monitored controller lives on the network
//! and where its register block starts.

use serde::{Deserialize, Serialize};

use crate::modbus::DEFAULT_BASE_ADDRESS;

/// Configuration of the monitored Modbus TCP controller.
///
/// # Fields
///
/// * `address` - IP address or host name of the controller (default: 127.0.0.1)
/// * `port` - Modbus TCP port (default: 502)
/// * `unit_id` - Modbus unit identifier (default: 1)
/// * `base_address` - First holding register of the block (default: 16384)
/// * `connect_timeout_ms` - Connection timeout (default: 3000)
/// * `request_timeout_ms` - Per-request timeout (default: 1000)
///
/// # Example
///
/// ```
/// use pressure_monitor::config::DeviceConfig;
///
/// let device = DeviceConfig {
///     address: "192.168.1.50".to_string(),
///     ..DeviceConfig::default()
/// };
/// assert_eq!(device.port, 502);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// The network address of the controller.
    ///
    /// Can be an IPv4/IPv6 address or a host name resolved at connect time.
    pub address: String,

    /// The TCP port the controller listens on.
    ///
    /// Default value is 502, which is the standard Modbus TCP port.
    pub port: u16,

    /// Modbus unit identifier addressed by every request.
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Holding register address of the Start field; the 13-register block
    /// is read from here.
    #[serde(default = "default_base_address")]
    pub base_address: u16,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_unit_id() -> u8 {
    1
}

fn default_base_address() -> u16 {
    DEFAULT_BASE_ADDRESS
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_request_timeout_ms() -> u64 {
    1000
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 502,
            unit_id: default_unit_id(),
            base_address: default_base_address(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}
