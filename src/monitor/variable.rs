// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Change-detecting variable cells
//!
//! A [`MonitoredVariable`] holds the last value read from the device and
//! notifies its subscribers only when that value really changes. The very
//! first assignment always notifies, even when it equals the default value.
//!
//! Subscribers run synchronously inside [`MonitoredVariable::set`], in
//! subscription order, before `set` returns. A subscriber must not subscribe
//! or unsubscribe on the variable that is notifying it: the subscriber list is
//! read-locked for the duration of the dispatch and doing so deadlocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::modbus::{Field, RegisterValue};

/// Float changes at or below this magnitude are ignored
pub const FLOAT_EPSILON: f32 = 1e-4;

/// Change predicate of a monitored value type
pub trait ChangeDetect: Copy + Default + Send + Sync + 'static {
    /// Whether `self` counts as a change from `previous`
    fn differs_from(&self, previous: &Self) -> bool;
}

impl ChangeDetect for i16 {
    fn differs_from(&self, previous: &Self) -> bool {
        self != previous
    }
}

impl ChangeDetect for f32 {
    // NaN never compares as a change once a value is held
    fn differs_from(&self, previous: &Self) -> bool {
        (self - previous).abs() > FLOAT_EPSILON
    }
}

/// Callback invoked with the new value on every transition
pub type Subscriber<T> = Box<dyn Fn(T) + Send + Sync>;

/// Handle returned by [`MonitoredVariable::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Value and assignment flag as seen by external consumers
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VariableSnapshot<T> {
    pub value: T,
    pub has_value: bool,
}

#[derive(Debug, Default)]
struct VariableState<T> {
    value: T,
    has_value: bool,
}

pub struct MonitoredVariable<T: ChangeDetect> {
    name: &'static str,
    state: RwLock<VariableState<T>>,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber<T>)>>,
    next_id: AtomicU64,
}

impl<T: ChangeDetect> MonitoredVariable<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: RwLock::new(VariableState::default()),
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn state(&self) -> RwLockReadGuard<'_, VariableState<T>> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, VariableState<T>> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self) -> T {
        self.state().value
    }

    pub fn has_value(&self) -> bool {
        self.state().has_value
    }

    pub fn snapshot(&self) -> VariableSnapshot<T> {
        let state = self.state();
        VariableSnapshot {
            value: state.value,
            has_value: state.has_value,
        }
    }

    /// Store `value` and notify subscribers if it is a transition.
    ///
    /// Values that do not count as a change are dropped, so float readings
    /// cannot creep by sub-epsilon steps. Returns whether a notification fired.
    pub fn set(&self, value: T) -> bool {
        {
            let mut state = self.state_mut();
            if state.has_value && !value.differs_from(&state.value) {
                return false;
            }
            state.value = value;
            state.has_value = true;
        }

        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, subscriber) in subscribers.iter() {
            subscriber(value);
        }
        true
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, Box::new(callback)));
        id
    }

    /// Remove a subscriber, returns false if the handle was unknown
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }
}

/// Values of every mirrored variable at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VariablesSnapshot {
    pub start: VariableSnapshot<i16>,
    pub stop: VariableSnapshot<i16>,
    pub setpoint: VariableSnapshot<f32>,
    pub pressure: VariableSnapshot<f32>,
    pub setpoint_reached: VariableSnapshot<i16>,
    pub leak: VariableSnapshot<i16>,
    pub over_pressure: VariableSnapshot<i16>,
    pub sensor_error: VariableSnapshot<i16>,
    pub setpoint_error: VariableSnapshot<i16>,
    pub success: VariableSnapshot<i16>,
    pub fail: VariableSnapshot<i16>,
}

/// The full set of variables mirrored from the controller
pub struct DeviceVariables {
    pub start: MonitoredVariable<i16>,
    pub stop: MonitoredVariable<i16>,
    pub setpoint: MonitoredVariable<f32>,
    pub pressure: MonitoredVariable<f32>,
    pub setpoint_reached: MonitoredVariable<i16>,
    pub leak: MonitoredVariable<i16>,
    pub over_pressure: MonitoredVariable<i16>,
    pub sensor_error: MonitoredVariable<i16>,
    pub setpoint_error: MonitoredVariable<i16>,
    pub success: MonitoredVariable<i16>,
    pub fail: MonitoredVariable<i16>,
}

impl Default for DeviceVariables {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceVariables {
    pub fn new() -> Self {
        Self {
            start: MonitoredVariable::new("start"),
            stop: MonitoredVariable::new("stop"),
            setpoint: MonitoredVariable::new("setpoint"),
            pressure: MonitoredVariable::new("pressure"),
            setpoint_reached: MonitoredVariable::new("setpoint_reached"),
            leak: MonitoredVariable::new("leak"),
            over_pressure: MonitoredVariable::new("over_pressure"),
            sensor_error: MonitoredVariable::new("sensor_error"),
            setpoint_error: MonitoredVariable::new("setpoint_error"),
            success: MonitoredVariable::new("success"),
            fail: MonitoredVariable::new("fail"),
        }
    }

    pub fn snapshot(&self) -> VariablesSnapshot {
        VariablesSnapshot {
            start: self.start.snapshot(),
            stop: self.stop.snapshot(),
            setpoint: self.setpoint.snapshot(),
            pressure: self.pressure.snapshot(),
            setpoint_reached: self.setpoint_reached.snapshot(),
            leak: self.leak.snapshot(),
            over_pressure: self.over_pressure.snapshot(),
            sensor_error: self.sensor_error.snapshot(),
            setpoint_error: self.setpoint_error.snapshot(),
            success: self.success.snapshot(),
            fail: self.fail.snapshot(),
        }
    }

    /// Integer variable backing `field`, `None` for float fields
    pub fn int(&self, field: Field) -> Option<&MonitoredVariable<i16>> {
        match field {
            Field::Start => Some(&self.start),
            Field::Stop => Some(&self.stop),
            Field::SetpointReached => Some(&self.setpoint_reached),
            Field::Leak => Some(&self.leak),
            Field::OverPressure => Some(&self.over_pressure),
            Field::SensorError => Some(&self.sensor_error),
            Field::SetpointError => Some(&self.setpoint_error),
            Field::Success => Some(&self.success),
            Field::Fail => Some(&self.fail),
            Field::Setpoint | Field::Pressure => None,
        }
    }

    /// Float variable backing `field`, `None` for integer fields
    pub fn float(&self, field: Field) -> Option<&MonitoredVariable<f32>> {
        match field {
            Field::Setpoint => Some(&self.setpoint),
            Field::Pressure => Some(&self.pressure),
            _ => None,
        }
    }

    /// Route a decoded value to its variable; returns whether it notified
    pub fn apply(&self, field: Field, value: RegisterValue) -> bool {
        match value {
            RegisterValue::Int(v) => self.int(field).map(|var| var.set(v)).unwrap_or(false),
            RegisterValue::Float(v) => self.float(field).map(|var| var.set(v)).unwrap_or(false),
        }
    }
}
