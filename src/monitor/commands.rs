// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Operator commands written to the controller
//!
//! Every command runs its writes inside one [`WriteSession`](crate::modbus::WriteSession),
//! so the poll loop cannot read the block between two writes of a sequence and
//! concurrent commands are serialised. Failed writes are returned to the
//! caller as-is, nothing is retried.

use std::sync::Arc;

use log::info;

use super::derived::DerivedState;
use crate::modbus::{encode_f32, Field, FieldBusLink, RegisterMap, TransportError};

pub struct CommandPort {
    link: Arc<FieldBusLink>,
    map: RegisterMap,
    derived: Arc<DerivedState>,
}

impl CommandPort {
    pub fn new(link: Arc<FieldBusLink>, map: RegisterMap, derived: Arc<DerivedState>) -> Self {
        Self { link, map, derived }
    }

    /// Write integer fields in order, stopping at the first failure
    async fn write_flags(&self, writes: &[(Field, i16)]) -> Result<(), TransportError> {
        let mut session = self.link.write_session().await?;
        for (field, value) in writes {
            session
                .write_register(self.map.address_of(*field), *value as u16)
                .await?;
        }
        Ok(())
    }

    /// Assert Start, then release Stop
    pub async fn start(&self) -> Result<(), TransportError> {
        self.write_flags(&[(Field::Start, 1), (Field::Stop, 0)]).await?;
        info!("Start command sent");
        Ok(())
    }

    /// Assert Stop, then release Start
    pub async fn stop(&self) -> Result<(), TransportError> {
        self.write_flags(&[(Field::Stop, 1), (Field::Start, 0)]).await?;
        info!("Stop command sent");
        Ok(())
    }

    pub async fn set_setpoint(&self, value: f32) -> Result<(), TransportError> {
        let mut session = self.link.write_session().await?;
        session
            .write_registers(self.map.address_of(Field::Setpoint), &encode_f32(value))
            .await?;
        info!("Setpoint set to {}", value);
        Ok(())
    }

    /// Zero and persist the counters, then release Start and Stop.
    ///
    /// The counters are reset even when the writes fail.
    pub async fn reset_status(&self) -> Result<(), TransportError> {
        self.derived.reset_counters();
        self.write_flags(&[(Field::Start, 0), (Field::Stop, 0)]).await?;
        info!("Status reset");
        Ok(())
    }

    /// Release Start and Stop and zero the setpoint
    pub async fn reset_all(&self) -> Result<(), TransportError> {
        let mut session = self.link.write_session().await?;
        session
            .write_register(self.map.address_of(Field::Start), 0)
            .await?;
        session
            .write_register(self.map.address_of(Field::Stop), 0)
            .await?;
        session
            .write_registers(self.map.address_of(Field::Setpoint), &encode_f32(0.0))
            .await?;
        info!("Controller outputs reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::transport::MockFieldBusTransport;
    use crate::persistence::{Counters, MemoryCounterStore, MemoryErrorLog};
    use mockall::Sequence;

    fn port_over(
        transport: MockFieldBusTransport,
        store: &MemoryCounterStore,
    ) -> (CommandPort, Arc<FieldBusLink>) {
        let link = Arc::new(FieldBusLink::new(Box::new(transport), 1));
        let derived = Arc::new(DerivedState::load(
            Box::new(store.clone()),
            Box::new(MemoryErrorLog::default()),
        ));
        (
            CommandPort::new(Arc::clone(&link), RegisterMap::default(), derived),
            link,
        )
    }

    fn expect_write(
        mock: &mut MockFieldBusTransport,
        seq: &mut Sequence,
        address: u16,
        value: u16,
    ) {
        mock.expect_write_register()
            .withf(move |unit, a, v| *unit == 1 && *a == address && *v == value)
            .times(1)
            .in_sequence(seq)
            .returning(|_, _, _| Ok(()));
    }

    #[tokio::test]
    async fn start_asserts_start_before_releasing_stop() {
        let mut mock = MockFieldBusTransport::new();
        mock.expect_is_connected().return_const(true);
        let mut seq = Sequence::new();
        expect_write(&mut mock, &mut seq, 16384, 1);
        expect_write(&mut mock, &mut seq, 16385, 0);
        let (port, link) = port_over(mock, &MemoryCounterStore::default());

        port.start().await.unwrap();
        assert!(!link.is_writing());
    }

    #[tokio::test]
    async fn stop_asserts_stop_before_releasing_start() {
        let mut mock = MockFieldBusTransport::new();
        mock.expect_is_connected().return_const(true);
        let mut seq = Sequence::new();
        expect_write(&mut mock, &mut seq, 16385, 1);
        expect_write(&mut mock, &mut seq, 16384, 0);
        let (port, _link) = port_over(mock, &MemoryCounterStore::default());

        port.stop().await.unwrap();
    }

    #[tokio::test]
    async fn setpoint_is_one_word_swapped_write() {
        let mut mock = MockFieldBusTransport::new();
        mock.expect_is_connected().return_const(true);
        mock.expect_write_registers()
            .withf(|_, address, values| *address == 16386 && values.to_vec() == [0x4049, 0x0FDB])
            .times(1)
            .returning(|_, _, _| Ok(()));
        let (port, _link) = port_over(mock, &MemoryCounterStore::default());

        port.set_setpoint(std::f32::consts::PI).await.unwrap();
    }

    #[tokio::test]
    async fn failed_write_aborts_the_sequence_and_clears_the_flag() {
        let mut mock = MockFieldBusTransport::new();
        mock.expect_is_connected().return_const(true);
        mock.expect_write_register()
            .withf(|_, address, _| *address == 16385)
            .times(1)
            .returning(|_, _, _| Err(TransportError::Exception("Server device failure".into())));
        // Start must not be released after Stop failed
        mock.expect_write_register()
            .withf(|_, address, _| *address == 16384)
            .never();
        let (port, link) = port_over(mock, &MemoryCounterStore::default());

        let err = port.stop().await.unwrap_err();
        assert!(matches!(err, TransportError::Exception(_)));
        assert!(!link.is_writing());
    }

    #[tokio::test]
    async fn reset_status_zeroes_counters_then_releases_flags() {
        let mut mock = MockFieldBusTransport::new();
        mock.expect_is_connected().return_const(true);
        let mut seq = Sequence::new();
        expect_write(&mut mock, &mut seq, 16384, 0);
        expect_write(&mut mock, &mut seq, 16385, 0);
        let store = MemoryCounterStore::with_counters(Counters {
            good_count: 7,
            fail_count: 2,
        });
        let (port, _link) = port_over(mock, &store);

        port.reset_status().await.unwrap();
        assert_eq!(store.stored(), Counters::default());
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn reset_all_clears_flags_and_setpoint() {
        let mut mock = MockFieldBusTransport::new();
        mock.expect_is_connected().return_const(true);
        let mut seq = Sequence::new();
        expect_write(&mut mock, &mut seq, 16384, 0);
        expect_write(&mut mock, &mut seq, 16385, 0);
        mock.expect_write_registers()
            .withf(|_, address, values| *address == 16386 && values.to_vec() == [0, 0])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        let (port, _link) = port_over(mock, &MemoryCounterStore::default());

        port.reset_all().await.unwrap();
    }

    #[tokio::test]
    async fn commands_fail_when_disconnected() {
        let mut mock = MockFieldBusTransport::new();
        mock.expect_is_connected().return_const(false);
        mock.expect_write_register().never();
        let (port, link) = port_over(mock, &MemoryCounterStore::default());

        assert_eq!(port.start().await, Err(TransportError::NotConnected));
        assert!(!link.is_writing());
    }
}
