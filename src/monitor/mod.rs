// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register decoding and change-detection engine
//!
//! ## Components
//!
//! - [`variable`]: change-detecting cells mirroring the controller registers
//! - [`engine`]: the poll loop that reads and applies the register block
//! - [`derived`]: good/fail counters and the error log fed by flag transitions
//! - [`commands`]: start, stop, setpoint and reset writes
//! - [`controller`]: the context object tying everything to one device

pub mod commands;
pub mod controller;
pub mod derived;
pub mod engine;
pub mod variable;

pub use commands::CommandPort;
pub use controller::{DeviceController, DeviceSnapshot};
pub use derived::{DerivedCounts, DerivedState};
pub use engine::{PollEngine, PollError, PollStats, PollTiming};
pub use variable::{
    ChangeDetect, DeviceVariables, MonitoredVariable, SubscriptionId, VariableSnapshot,
    VariablesSnapshot, FLOAT_EPSILON,
};
