// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus communication module
//!
//! This module provides the Modbus TCP client side used to poll the
//! leak-test controller, plus a simulated controller for tests and bench work.
//!
//! ## Key Components
//!
//! - [`RegisterMap`]: static layout of the monitored holding register block
//! - [`codec`]: word-swapped 32-bit float conversion
//! - [`FieldBusTransport`]: raw register access, implemented by [`TcpTransport`]
//!   over `tokio-modbus` and by [`MockDeviceTransport`] in-process
//! - [`FieldBusLink`]: the shared transport with read/write mutual exclusion
//! - [`simulator`]: Modbus TCP server and process model of the controller
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use pressure_monitor::modbus::{FieldBusLink, RegisterMap, TcpTransport};
//!
//! # async fn demo() -> Result<(), pressure_monitor::modbus::TransportError> {
//! let map = RegisterMap::default();
//! let transport = TcpTransport::new(
//!     "192.168.1.50",
//!     502,
//!     Duration::from_secs(3),
//!     Duration::from_secs(1),
//! );
//! let link = FieldBusLink::new(Box::new(transport), 1);
//! link.connect().await?;
//! let block = link.read_block(map.base_address(), map.block_length()).await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod link;
pub mod register_map;
pub mod simulator;
pub mod transport;

pub use codec::{decode_f32, encode_f32};
pub use link::{FieldBusLink, WriteSession};
pub use register_map::{
    DecodeError, Field, FieldKind, FieldSpec, RegisterMap, RegisterValue, BLOCK_LENGTH,
    DEFAULT_BASE_ADDRESS,
};
pub use simulator::{DeviceSimulator, MockDeviceTransport, PressureCellSimulation, RegisterBank};
pub use transport::{FieldBusTransport, TcpTransport, TransportError};
