// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Persistence locations

use serde::{Deserialize, Serialize};

/// Files backing the good/fail counters and the error log.
///
/// Relative paths are resolved against the working directory of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// YAML document rewritten on every counter change (default: counters.yaml)
    pub counters_file: String,

    /// Append-only text file, one line per error (default: errors.log)
    pub error_log_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            counters_file: "counters.yaml".to_string(),
            error_log_file: "errors.log".to_string(),
        }
    }
}
