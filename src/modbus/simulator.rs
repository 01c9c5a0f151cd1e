// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Simulated leak-test controller
//!
//! The simulator exposes the monitored holding register block over Modbus TCP
//! (server side of `tokio-modbus`) and in-process through
//! [`MockDeviceTransport`]. Both views share one [`RegisterBank`], so a test
//! can drive the device through either path and observe it through the other.
//!
//! [`PressureCellSimulation`] animates the bank: while Start is asserted the
//! pressure ramps toward the setpoint, SetpointReached is raised, and after a
//! hold period the cycle ends with Success (or Fail with a leak every Nth
//! cycle) and Start is released.

use std::{
    collections::HashMap,
    future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use async_trait::async_trait;
use log::{debug, error, info};
use rand::Rng;
use tokio::net::TcpListener;
use tokio_modbus::{
    prelude::*,
    server::tcp::{accept_tcp_connection, Server},
};

use super::codec::{decode_f32_at, encode_f32};
use super::register_map::{Field, RegisterMap};
use super::transport::{FieldBusTransport, TransportError};

/// Holding registers of a simulated device, shared between its front ends
#[derive(Debug, Clone, Default)]
pub struct RegisterBank {
    registers: Arc<Mutex<HashMap<u16, u16>>>,
}

impl RegisterBank {
    /// Bank holding every register of `map`, all zero
    ///
    /// Addresses wrap like [`RegisterMap::address_of`] when the block runs
    /// past register 65535.
    pub fn for_map(map: &RegisterMap) -> Self {
        let registers = (0..map.block_length())
            .map(|offset| (map.base_address().wrapping_add(offset), 0))
            .collect();
        Self {
            registers: Arc::new(Mutex::new(registers)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u16, u16>> {
        self.registers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, address: u16) -> Option<u16> {
        self.lock().get(&address).copied()
    }

    /// Set an existing register, returns false for unknown addresses
    pub fn set(&self, address: u16, value: u16) -> bool {
        match self.lock().get_mut(&address) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Read `cnt` registers starting at `addr`
    ///
    /// Fails with `IllegalDataAddress` if any address is outside the bank.
    pub fn read(&self, addr: u16, cnt: u16) -> Result<Vec<u16>, ExceptionCode> {
        let registers = self.lock();
        let mut response_values = vec![0; cnt.into()];

        for i in 0..cnt {
            let reg_addr = addr.wrapping_add(i);
            if let Some(r) = registers.get(&reg_addr) {
                response_values[i as usize] = *r;
            } else {
                error!(
                    "Exception::IllegalDataAddress - Register {} not found",
                    reg_addr
                );
                return Err(ExceptionCode::IllegalDataAddress);
            }
        }

        debug!("Successfully read {} registers from address {}", cnt, addr);
        Ok(response_values)
    }

    /// Write consecutive registers starting at `addr`; nothing is written
    /// unless every target address exists.
    pub fn write(&self, addr: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        let mut registers = self.lock();

        let all_known = (0..values.len())
            .all(|i| registers.contains_key(&addr.wrapping_add(i as u16)));
        if !all_known {
            error!(
                "Exception::IllegalDataAddress - write of {} registers at {} leaves the bank",
                values.len(),
                addr
            );
            return Err(ExceptionCode::IllegalDataAddress);
        }

        for (i, value) in values.iter().enumerate() {
            registers.insert(addr.wrapping_add(i as u16), *value);
        }
        debug!(
            "Successfully wrote {} values starting at register {}",
            values.len(),
            addr
        );
        Ok(())
    }
}

/// Modbus TCP service answering holding register requests from a [`RegisterBank`]
pub struct DeviceSimulator {
    bank: RegisterBank,
}

impl DeviceSimulator {
    pub fn new(bank: RegisterBank) -> Self {
        Self { bank }
    }
}

impl tokio_modbus::server::Service for DeviceSimulator {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    /// Handles function codes 0x03 (read holding), 0x06 (write single) and
    /// 0x10 (write multiple); anything else is an `IllegalFunction`.
    fn call(&self, req: Self::Request) -> Self::Future {
        debug!("Received Modbus request: {:?}", req);

        let res = match req {
            Request::ReadHoldingRegisters(addr, cnt) => {
                self.bank.read(addr, cnt).map(Response::ReadHoldingRegisters)
            }
            Request::WriteMultipleRegisters(addr, values) => self
                .bank
                .write(addr, &values)
                .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16)),
            Request::WriteSingleRegister(addr, value) => self
                .bank
                .write(addr, std::slice::from_ref(&value))
                .map(|_| Response::WriteSingleRegister(addr, value)),
            _ => {
                error!(
                    "Exception::IllegalFunction - Unimplemented function code in request: {req:?}"
                );
                Err(ExceptionCode::IllegalFunction)
            }
        };

        future::ready(res)
    }
}

/// Serve `bank` over Modbus TCP on an already bound listener until the task is dropped
pub async fn serve(listener: TcpListener, bank: RegisterBank) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Simulated controller listening on {}", addr);
    }
    let server = Server::new(listener);

    let on_connected = |stream, socket_addr| {
        let bank = bank.clone();
        async move {
            accept_tcp_connection(stream, socket_addr, move |_socket_addr| {
                Ok(Some(DeviceSimulator::new(bank.clone())))
            })
        }
    };
    let on_process_error = |err| {
        error!("Simulated controller error: {}", err);
    };

    server.serve(&on_connected, on_process_error).await
}

/// In-process transport over a [`RegisterBank`].
///
/// The `online` switch simulates a cable pull: while it is off, connecting
/// fails and any request drops the connection with an I/O error.
pub struct MockDeviceTransport {
    bank: RegisterBank,
    online: Arc<AtomicBool>,
    connected: bool,
}

impl MockDeviceTransport {
    pub fn new(bank: RegisterBank) -> Self {
        Self {
            bank,
            online: Arc::new(AtomicBool::new(true)),
            connected: false,
        }
    }

    /// Handle toggling whether the simulated device is reachable
    pub fn online_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.online)
    }

    fn check(&mut self) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if !self.online.load(Ordering::SeqCst) {
            self.connected = false;
            return Err(TransportError::Io("simulated device offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl FieldBusTransport for MockDeviceTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(TransportError::Io("connection refused".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn read_block(
        &mut self,
        _unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        self.check()?;
        self.bank
            .read(address, count)
            .map_err(|code| TransportError::Exception(code.to_string()))
    }

    async fn write_register(
        &mut self,
        _unit: u8,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        self.check()?;
        self.bank
            .write(address, &[value])
            .map_err(|code| TransportError::Exception(code.to_string()))
    }

    async fn write_registers(
        &mut self,
        _unit: u8,
        address: u16,
        values: &[u16],
    ) -> Result<(), TransportError> {
        self.check()?;
        self.bank
            .write(address, values)
            .map_err(|code| TransportError::Exception(code.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CyclePhase {
    Idle,
    Pressurising,
    Holding { ticks: u32 },
}

/// Process model of a pressure leak-test cell driven through a [`RegisterBank`]
pub struct PressureCellSimulation {
    map: RegisterMap,
    bank: RegisterBank,
    phase: CyclePhase,
    completed_cycles: u32,
    /// Every Nth cycle ends with a leak and a reject; 0 disables failures
    pub fail_every: u32,
    /// Ticks spent holding pressure before the verdict
    pub hold_ticks: u32,
    /// Fraction of the remaining gap closed each tick while pressurising
    pub ramp_rate: f32,
    /// Peak amplitude of the uniform noise added to the pressure reading
    pub noise: f32,
}

impl PressureCellSimulation {
    pub fn new(map: RegisterMap, bank: RegisterBank) -> Self {
        Self {
            map,
            bank,
            phase: CyclePhase::Idle,
            completed_cycles: 0,
            fail_every: 4,
            hold_ticks: 10,
            ramp_rate: 0.25,
            noise: 0.0,
        }
    }

    pub fn completed_cycles(&self) -> u32 {
        self.completed_cycles
    }

    fn flag(&self, field: Field) -> bool {
        self.bank.get(self.map.address_of(field)).unwrap_or(0) != 0
    }

    fn set_flag(&self, field: Field, on: bool) {
        self.bank.set(self.map.address_of(field), on as u16);
    }

    fn float(&self, field: Field) -> f32 {
        self.bank
            .read(self.map.address_of(field), 2)
            .ok()
            .and_then(|words| decode_f32_at(&words, 0))
            .unwrap_or(0.0)
    }

    fn set_float(&self, field: Field, value: f32) {
        // The bank always holds the full block, so this cannot fail
        let _ = self.bank.write(self.map.address_of(field), &encode_f32(value));
    }

    fn noisy(&self, value: f32) -> f32 {
        if self.noise.is_finite() && self.noise > 0.0 {
            value + self.noise * rand::rng().random_range(-1.0f32..1.0)
        } else {
            value
        }
    }

    /// Advance the process by one tick
    pub fn step(&mut self) {
        let setpoint = self.float(Field::Setpoint);
        let pressure = self.float(Field::Pressure);

        if self.flag(Field::Stop) {
            if self.phase != CyclePhase::Idle {
                info!("Simulated cycle aborted by stop command");
            }
            self.phase = CyclePhase::Idle;
            self.set_flag(Field::SetpointReached, false);
            self.set_float(Field::Pressure, self.noisy(pressure * 0.5));
            return;
        }

        match self.phase {
            CyclePhase::Idle => {
                if self.flag(Field::Start) {
                    if setpoint.is_nan() || setpoint <= 0.0 {
                        self.set_flag(Field::SetpointError, true);
                        self.set_flag(Field::Start, false);
                        return;
                    }
                    debug!("Simulated cycle started toward {} bar", setpoint);
                    for field in [
                        Field::Success,
                        Field::Fail,
                        Field::Leak,
                        Field::OverPressure,
                        Field::SetpointError,
                        Field::SetpointReached,
                    ] {
                        self.set_flag(field, false);
                    }
                    self.phase = CyclePhase::Pressurising;
                } else {
                    self.set_float(Field::Pressure, self.noisy(pressure * 0.5));
                }
            }
            CyclePhase::Pressurising => {
                let next = pressure + (setpoint - pressure) * self.ramp_rate;
                self.set_float(Field::Pressure, self.noisy(next));
                if next > setpoint * 1.2 {
                    self.set_flag(Field::OverPressure, true);
                }
                if (setpoint - next).abs() <= setpoint * 0.01 {
                    self.set_flag(Field::SetpointReached, true);
                    self.phase = CyclePhase::Holding { ticks: 0 };
                }
            }
            CyclePhase::Holding { ticks } => {
                let failing =
                    self.fail_every > 0 && (self.completed_cycles + 1) % self.fail_every == 0;
                let held = if failing { pressure * 0.98 } else { setpoint };
                self.set_float(Field::Pressure, self.noisy(held));

                if ticks + 1 < self.hold_ticks {
                    self.phase = CyclePhase::Holding { ticks: ticks + 1 };
                    return;
                }

                self.completed_cycles += 1;
                if failing {
                    self.set_flag(Field::Leak, true);
                    self.set_flag(Field::Fail, true);
                } else {
                    self.set_flag(Field::Success, true);
                }
                info!(
                    "Simulated cycle {} finished: {}",
                    self.completed_cycles,
                    if failing { "fail" } else { "success" }
                );
                self.set_flag(Field::SetpointReached, false);
                self.set_flag(Field::Start, false);
                self.phase = CyclePhase::Idle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_rejects_out_of_block_access() {
        let map = RegisterMap::default();
        let bank = RegisterBank::for_map(&map);
        assert_eq!(bank.read(16384, 13).unwrap().len(), 13);
        assert_eq!(bank.read(16384, 14), Err(ExceptionCode::IllegalDataAddress));
        assert_eq!(bank.write(16396, &[1, 2]), Err(ExceptionCode::IllegalDataAddress));
        // The failed write did not touch the register inside the bank
        assert_eq!(bank.get(16396), Some(0));
    }

    #[test]
    fn bank_near_the_top_of_the_address_space_wraps() {
        let map = RegisterMap::new(65530);
        let bank = RegisterBank::for_map(&map);
        assert_eq!(bank.get(65535), Some(0));
        assert_eq!(bank.get(map.address_of(Field::Fail)), Some(0));
        assert_eq!(bank.read(65530, 13).unwrap().len(), 13);
    }

    #[test]
    fn unbounded_noise_leaves_the_reading_untouched() {
        let map = RegisterMap::default();
        let bank = RegisterBank::for_map(&map);
        let mut cell = PressureCellSimulation::new(map, bank);

        cell.noise = f32::INFINITY;
        assert_eq!(cell.noisy(1.5), 1.5);
        cell.noise = f32::NAN;
        assert_eq!(cell.noisy(1.5), 1.5);

        cell.noise = 0.5;
        for _ in 0..100 {
            let v = cell.noisy(1.5);
            assert!((1.0..=2.0).contains(&v), "{v}");
        }
    }

    #[tokio::test]
    async fn mock_transport_goes_offline() {
        let bank = RegisterBank::for_map(&RegisterMap::default());
        let mut transport = MockDeviceTransport::new(bank.clone());
        let online = transport.online_switch();

        transport.connect().await.unwrap();
        transport.write_register(1, 16384, 1).await.unwrap();
        assert_eq!(bank.get(16384), Some(1));

        online.store(false, Ordering::SeqCst);
        let err = transport.read_block(1, 16384, 13).await.unwrap_err();
        assert!(err.is_link_loss());
        assert!(!transport.is_connected());
        assert!(transport.connect().await.is_err());
    }

    #[test]
    fn simulated_cycles_alternate_success_and_fail() {
        let map = RegisterMap::default();
        let bank = RegisterBank::for_map(&map);
        let mut cell = PressureCellSimulation::new(map, bank.clone());
        cell.fail_every = 2;
        cell.hold_ticks = 2;

        bank.write(map.address_of(Field::Setpoint), &encode_f32(6.0)).unwrap();

        let run_cycle = |cell: &mut PressureCellSimulation| {
            bank.set(map.address_of(Field::Start), 1);
            for _ in 0..100 {
                cell.step();
                if bank.get(map.address_of(Field::Start)) == Some(0) {
                    break;
                }
            }
        };

        run_cycle(&mut cell);
        assert_eq!(bank.get(map.address_of(Field::Success)), Some(1));
        assert_eq!(bank.get(map.address_of(Field::Fail)), Some(0));

        run_cycle(&mut cell);
        assert_eq!(bank.get(map.address_of(Field::Success)), Some(0));
        assert_eq!(bank.get(map.address_of(Field::Fail)), Some(1));
        assert_eq!(bank.get(map.address_of(Field::Leak)), Some(1));
        assert_eq!(cell.completed_cycles(), 2);
    }

    #[test]
    fn start_without_setpoint_raises_setpoint_error() {
        let map = RegisterMap::default();
        let bank = RegisterBank::for_map(&map);
        let mut cell = PressureCellSimulation::new(map, bank.clone());

        bank.set(map.address_of(Field::Start), 1);
        cell.step();
        assert_eq!(bank.get(map.address_of(Field::SetpointError)), Some(1));
        assert_eq!(bank.get(map.address_of(Field::Start)), Some(0));
    }
}
