// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Shared access point to the field-bus transport
//!
//! The poll loop and the command path both go through a [`FieldBusLink`].
//! The transport sits behind an async mutex, so a block read and a write
//! sequence can never be in flight at the same time. On top of that the link
//! exposes an `is_writing` indicator: a [`WriteSession`] raises it *before*
//! waiting for the transport and lowers it when dropped, and block reads are
//! refused while it is raised. Dropping covers success, failure and
//! cancellation of the command future alike.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use super::transport::{FieldBusTransport, TransportError};

/// Transport shared between the poll engine and the command port
pub struct FieldBusLink {
    transport: AsyncMutex<Box<dyn FieldBusTransport>>,
    unit_id: u8,
    connected: AtomicBool,
    active_writers: AtomicUsize,
    disconnected_since: Mutex<Option<DateTime<Utc>>>,
}

impl FieldBusLink {
    pub fn new(transport: Box<dyn FieldBusTransport>, unit_id: u8) -> Self {
        let connected = transport.is_connected();
        Self {
            transport: AsyncMutex::new(transport),
            unit_id,
            connected: AtomicBool::new(connected),
            active_writers: AtomicUsize::new(0),
            disconnected_since: Mutex::new(if connected { None } else { Some(Utc::now()) }),
        }
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// True while at least one write session is open or waiting for the transport
    pub fn is_writing(&self) -> bool {
        self.active_writers.load(Ordering::SeqCst) > 0
    }

    /// When the link was last seen going down, `None` while connected
    pub fn disconnected_since(&self) -> Option<DateTime<Utc>> {
        *self
            .disconnected_since
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn connect(&self) -> Result<(), TransportError> {
        let mut transport = self.transport.lock().await;
        let result = transport.connect().await;
        self.set_connected(transport.is_connected());
        result
    }

    pub async fn disconnect(&self) -> Result<(), TransportError> {
        let mut transport = self.transport.lock().await;
        let result = transport.disconnect().await;
        self.set_connected(false);
        result
    }

    /// Read the whole block in a single transaction.
    ///
    /// Fails with [`TransportError::WriteInProgress`] without touching the
    /// device when a write session is open or queued.
    pub async fn read_block(&self, address: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        if self.is_writing() {
            return Err(TransportError::WriteInProgress);
        }
        let mut transport = self.transport.lock().await;
        // A writer may have queued up while we waited for the lock
        if self.is_writing() {
            return Err(TransportError::WriteInProgress);
        }
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let result = transport.read_block(self.unit_id, address, count).await;
        self.observe(&result, transport.is_connected());
        result
    }

    /// Open a write session, holding the transport until the session is dropped
    pub async fn write_session(&self) -> Result<WriteSession<'_>, TransportError> {
        let flag = WritingFlag::raise(&self.active_writers);
        let transport = self.transport.lock().await;
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        Ok(WriteSession {
            link: self,
            transport,
            _flag: flag,
        })
    }

    fn observe<T>(&self, result: &Result<T, TransportError>, still_connected: bool) {
        if let Err(e) = result {
            if e.is_link_loss() || !still_connected {
                self.set_connected(false);
            }
        }
    }

    fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        let mut since = self
            .disconnected_since
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match (was, connected) {
            (false, true) => {
                info!("Field bus link up (unit {})", self.unit_id);
                *since = None;
            }
            (true, false) => {
                warn!("Field bus link down (unit {})", self.unit_id);
                *since = Some(Utc::now());
            }
            (false, false) if since.is_none() => *since = Some(Utc::now()),
            _ => {}
        }
    }
}

/// Counts an open write session; decremented on drop
struct WritingFlag<'a>(&'a AtomicUsize);

impl<'a> WritingFlag<'a> {
    fn raise(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        WritingFlag(counter)
    }
}

impl Drop for WritingFlag<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Exclusive write access to the transport.
///
/// `is_writing` stays raised for the whole lifetime of the session.
pub struct WriteSession<'a> {
    link: &'a FieldBusLink,
    transport: MutexGuard<'a, Box<dyn FieldBusTransport>>,
    _flag: WritingFlag<'a>,
}

impl WriteSession<'_> {
    pub async fn write_register(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        debug!("Writing {} to holding register {}", value, address);
        let result = self
            .transport
            .write_register(self.link.unit_id, address, value)
            .await;
        self.link.observe(&result, self.transport.is_connected());
        result
    }

    pub async fn write_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> Result<(), TransportError> {
        debug!(
            "Writing {} registers starting at holding register {}",
            values.len(),
            address
        );
        let result = self
            .transport
            .write_registers(self.link.unit_id, address, values)
            .await;
        self.link.observe(&result, self.transport.is_connected());
        result
    }
}
