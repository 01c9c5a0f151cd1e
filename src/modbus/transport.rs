// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Field-bus transport abstraction and its Modbus TCP implementation
//!
//! For avoiding confusion with the Modbus master/slave terminology, this module uses
//! the terms "server" and "client" instead. The controller is the server that holds
//! the registers, this application is the client that polls them.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::time::{self, error::Elapsed};
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

/// Errors raised by a field-bus transport
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Not connected to the field bus")]
    NotConnected,

    #[error("A register write is in progress, block read not issued")]
    WriteInProgress,

    #[error("Field bus I/O error: {0}")]
    Io(String),

    #[error("Device answered with exception: {0}")]
    Exception(String),

    #[error("Field bus request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid endpoint '{0}'")]
    InvalidEndpoint(String),
}

impl TransportError {
    /// Whether the error means the connection itself is gone
    pub fn is_link_loss(&self) -> bool {
        matches!(self, TransportError::Io(_) | TransportError::Timeout(_))
    }
}

/// Raw register access to a field-bus device.
///
/// Implementations are driven by [`FieldBusLink`](super::link::FieldBusLink),
/// which serialises every call, so they only need `&mut self` access.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FieldBusTransport: Send {
    /// Open the connection to the configured endpoint
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Close the connection; closing an already closed transport is not an error
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Read `count` holding registers starting at `address` in one transaction
    async fn read_block(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError>;

    /// Write one holding register
    async fn write_register(
        &mut self,
        unit: u8,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError>;

    /// Write consecutive holding registers in one transaction
    async fn write_registers(
        &mut self,
        unit: u8,
        address: u16,
        values: &[u16],
    ) -> Result<(), TransportError>;
}

/// Modbus TCP client transport backed by `tokio-modbus`
pub struct TcpTransport {
    address: String,
    port: u16,
    connect_timeout: Duration,
    request_timeout: Duration,
    context: Option<Context>,
}

impl TcpTransport {
    pub fn new(
        address: impl Into<String>,
        port: u16,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            address: address.into(),
            port,
            connect_timeout,
            request_timeout,
            context: None,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    fn context(&mut self, unit: u8) -> Result<&mut Context, TransportError> {
        let ctx = self.context.as_mut().ok_or(TransportError::NotConnected)?;
        ctx.set_slave(Slave(unit));
        Ok(ctx)
    }

    /// Flatten the timeout / transport / exception layers of a response.
    ///
    /// I/O failures and timeouts drop the client context: a Modbus TCP stream
    /// that missed a response cannot be trusted for the next request.
    fn settle<T>(
        &mut self,
        outcome: Result<tokio_modbus::Result<T>, Elapsed>,
    ) -> Result<T, TransportError> {
        let err = match outcome {
            Ok(Ok(Ok(value))) => return Ok(value),
            Ok(Ok(Err(code))) => return Err(TransportError::Exception(code.to_string())),
            Ok(Err(e)) => TransportError::Io(e.to_string()),
            Err(_) => TransportError::Timeout(self.request_timeout),
        };
        warn!("Dropping Modbus connection to {}: {}", self.endpoint(), err);
        self.context = None;
        Err(err)
    }
}

/// Resolve a host name or literal address to the first socket address.
///
/// Takes owned values so the returned future never borrows the transport,
/// whose client context is not `Sync`.
async fn resolve(address: String, port: u16) -> Result<SocketAddr, TransportError> {
    let endpoint = format!("{}:{}", address, port);
    let mut candidates = tokio::net::lookup_host((address.as_str(), port))
        .await
        .map_err(|_| TransportError::InvalidEndpoint(endpoint.clone()))?;
    candidates
        .next()
        .ok_or(TransportError::InvalidEndpoint(endpoint))
}

#[async_trait]
impl FieldBusTransport for TcpTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.context.is_some() {
            return Ok(());
        }

        let connect_timeout = self.connect_timeout;
        let socket_addr = resolve(self.address.clone(), self.port).await?;
        debug!("Connecting to Modbus server at {}", socket_addr);
        let ctx = time::timeout(connect_timeout, tcp::connect(socket_addr))
            .await
            .map_err(|_| TransportError::Timeout(connect_timeout))?
            .map_err(|e| TransportError::Io(e.to_string()))?;

        info!("Connected to Modbus server at {}", socket_addr);
        self.context = Some(ctx);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(mut ctx) = self.context.take() {
            debug!("Disconnecting from Modbus server at {}", self.endpoint());
            ctx.disconnect()
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.context.is_some()
    }

    async fn read_block(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let timeout = self.request_timeout;
        let ctx = self.context(unit)?;
        let outcome = time::timeout(timeout, ctx.read_holding_registers(address, count)).await;
        self.settle(outcome)
    }

    async fn write_register(
        &mut self,
        unit: u8,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        let timeout = self.request_timeout;
        let ctx = self.context(unit)?;
        let outcome = time::timeout(timeout, ctx.write_single_register(address, value)).await;
        self.settle(outcome)
    }

    async fn write_registers(
        &mut self,
        unit: u8,
        address: u16,
        values: &[u16],
    ) -> Result<(), TransportError> {
        let timeout = self.request_timeout;
        let ctx = self.context(unit)?;
        let outcome = time::timeout(timeout, ctx.write_multiple_registers(address, values)).await;
        self.settle(outcome)
    }
}
