// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::{debug, warn};

use super::{Config, CONFIG_SCHEMA};
use crate::modbus::RegisterMap;

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// # Example
///
/// ```bash
/// ./pressure_monitor --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost".
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    // Special cases
    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Validates the configuration against rules that aren't covered by the JSON schema.
///
/// # Validation Rules
///
/// - **Port Range**: the controller port is not 0
/// - **Block Range**: the 13-register block fits below address 65536
/// - **Cadence**: interval, backoff and reconnect delays are not 0
/// - **Storage**: counters and error log use distinct files
/// - **Address Format**: a host name instead of an IP address only logs a warning
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    if config.device.port == 0 {
        anyhow::bail!("Invalid device port number: {}", config.device.port);
    }

    if !RegisterMap::new(config.device.base_address).fits_address_space() {
        anyhow::bail!(
            "Register block starting at {} runs past the end of the address space",
            config.device.base_address
        );
    }

    let polling = &config.polling;
    if polling.interval_ms == 0 || polling.backoff_ms == 0 || polling.reconnect_interval_ms == 0
    {
        anyhow::bail!("Polling delays must be greater than zero");
    }

    if config.storage.counters_file == config.storage.error_log_file {
        anyhow::bail!(
            "Counters and error log cannot share the file {}",
            config.storage.counters_file
        );
    }

    if !is_valid_ip_address(&config.device.address) {
        // Host names are resolved at connect time
        warn!(
            "Device address {} is not an IP address, it will be resolved as a host name",
            config.device.address
        );
    }

    Ok(())
}
