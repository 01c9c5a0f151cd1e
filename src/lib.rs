// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Pressure monitor library
//!
//! This library polls the holding registers of a pressure leak-test
//! controller over Modbus TCP, mirrors them into change-detecting variables
//! and derives good/fail counters and an error log from their transitions.
//!
//! ## Modules
//!
//! - [`modbus`]: register map, float codec, transports and a simulated controller
//! - [`monitor`]: variables, poll engine, derived state, commands and the controller context
//! - [`persistence`]: counter and error log sinks
//! - [`config`]: YAML configuration validated against an embedded JSON schema
//! - [`daemon`]: background supervision of a running controller

pub mod config;
pub mod daemon;
pub mod modbus;
pub mod monitor;
pub mod persistence;
