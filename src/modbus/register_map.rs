// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Holding register map of the leak-test controller
//!
//! ## Register Map
//!
//! | Offset | Field | Kind |
//! |--------|-------|------|
//! | 0 | Start command | i16 |
//! | 1 | Stop command | i16 |
//! | 2-3 | Pressure setpoint | f32 (word-swapped) |
//! | 4-5 | Measured pressure | f32 (word-swapped) |
//! | 6 | Setpoint reached | i16 |
//! | 7 | Leak detected | i16 |
//! | 8 | Over-pressure | i16 |
//! | 9 | Pressure sensor error | i16 |
//! | 10 | Setpoint error | i16 |
//! | 11 | Cycle success | i16 |
//! | 12 | Cycle fail | i16 |
//!
//! Offsets are relative to a configurable base address (16384 on the
//! reference controller). The whole map is read as one contiguous block.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::codec::{decode_f32_at, FLOAT_SPAN};

/// Default first holding register of the monitored block.
pub const DEFAULT_BASE_ADDRESS: u16 = 16384;

/// Number of registers in the monitored block.
pub const BLOCK_LENGTH: u16 = 13;

/// Errors raised while turning a raw register block into typed values
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Register block too short for {field:?}: needs {needed} registers, got {available}")]
    Truncated {
        field: Field,
        needed: usize,
        available: usize,
    },
}

/// Every named field of the monitored block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    Start,
    Stop,
    Setpoint,
    Pressure,
    SetpointReached,
    Leak,
    OverPressure,
    SensorError,
    SetpointError,
    Success,
    Fail,
}

/// How a field is laid out in registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// One register, two's-complement 16-bit integer
    Int16,
    /// Two registers, word-swapped IEEE-754 single precision
    Float32,
}

impl FieldKind {
    /// Number of registers occupied by a value of this kind
    pub fn span(self) -> u16 {
        match self {
            FieldKind::Int16 => 1,
            FieldKind::Float32 => FLOAT_SPAN,
        }
    }
}

/// Static placement of one field within the block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub field: Field,
    pub offset: u16,
    pub kind: FieldKind,
}

/// A decoded field value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegisterValue {
    Int(i16),
    Float(f32),
}

/// Fields in the order a poll cycle applies them: plain integers first,
/// then floats, then the remaining flags.
const FIELDS: [FieldSpec; 11] = [
    FieldSpec {
        field: Field::Start,
        offset: 0,
        kind: FieldKind::Int16,
    },
    FieldSpec {
        field: Field::Stop,
        offset: 1,
        kind: FieldKind::Int16,
    },
    FieldSpec {
        field: Field::Setpoint,
        offset: 2,
        kind: FieldKind::Float32,
    },
    FieldSpec {
        field: Field::Pressure,
        offset: 4,
        kind: FieldKind::Float32,
    },
    FieldSpec {
        field: Field::SetpointReached,
        offset: 6,
        kind: FieldKind::Int16,
    },
    FieldSpec {
        field: Field::Leak,
        offset: 7,
        kind: FieldKind::Int16,
    },
    FieldSpec {
        field: Field::OverPressure,
        offset: 8,
        kind: FieldKind::Int16,
    },
    FieldSpec {
        field: Field::SensorError,
        offset: 9,
        kind: FieldKind::Int16,
    },
    FieldSpec {
        field: Field::SetpointError,
        offset: 10,
        kind: FieldKind::Int16,
    },
    FieldSpec {
        field: Field::Success,
        offset: 11,
        kind: FieldKind::Int16,
    },
    FieldSpec {
        field: Field::Fail,
        offset: 12,
        kind: FieldKind::Int16,
    },
];

/// Register map anchored at a base address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMap {
    base_address: u16,
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_ADDRESS)
    }
}

impl RegisterMap {
    pub fn new(base_address: u16) -> Self {
        Self { base_address }
    }

    /// Map anchored at `base_address`, `None` when the block would run past register 65535
    pub fn checked(base_address: u16) -> Option<Self> {
        let map = Self::new(base_address);
        map.fits_address_space().then_some(map)
    }

    /// Whether every register of the block has an address below 65536
    pub fn fits_address_space(&self) -> bool {
        u32::from(self.base_address) + u32::from(BLOCK_LENGTH) <= 0x1_0000
    }

    pub fn base_address(&self) -> u16 {
        self.base_address
    }

    /// Number of registers to read in one transaction
    pub fn block_length(&self) -> u16 {
        BLOCK_LENGTH
    }

    /// All fields, in poll application order
    pub fn fields(&self) -> &'static [FieldSpec] {
        &FIELDS
    }

    pub fn spec(&self, field: Field) -> FieldSpec {
        let index = match field {
            Field::Start => 0,
            Field::Stop => 1,
            Field::Setpoint => 2,
            Field::Pressure => 3,
            Field::SetpointReached => 4,
            Field::Leak => 5,
            Field::OverPressure => 6,
            Field::SensorError => 7,
            Field::SetpointError => 8,
            Field::Success => 9,
            Field::Fail => 10,
        };
        FIELDS[index]
    }

    /// Absolute holding register address of a field
    pub fn address_of(&self, field: Field) -> u16 {
        self.base_address.wrapping_add(self.spec(field).offset)
    }

    /// Decode a single field out of a block read from the base address.
    pub fn decode(&self, spec: &FieldSpec, block: &[u16]) -> Result<RegisterValue, DecodeError> {
        let offset = spec.offset as usize;
        let needed = offset + spec.kind.span() as usize;
        let truncated = || DecodeError::Truncated {
            field: spec.field,
            needed,
            available: block.len(),
        };

        match spec.kind {
            FieldKind::Int16 => block
                .get(offset)
                .map(|raw| RegisterValue::Int(*raw as i16))
                .ok_or_else(truncated),
            FieldKind::Float32 => decode_f32_at(block, offset)
                .map(RegisterValue::Float)
                .ok_or_else(truncated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_is_contiguous_and_covers_every_field() {
        let map = RegisterMap::default();
        let mut covered = vec![false; map.block_length() as usize];
        for spec in map.fields() {
            for i in 0..spec.kind.span() {
                let slot = &mut covered[(spec.offset + i) as usize];
                assert!(!*slot, "register {} mapped twice", spec.offset + i);
                *slot = true;
            }
        }
        assert!(covered.iter().all(|c| *c));
    }

    #[test]
    fn absolute_addresses_match_the_controller() {
        let map = RegisterMap::default();
        assert_eq!(map.address_of(Field::Start), 16384);
        assert_eq!(map.address_of(Field::Stop), 16385);
        assert_eq!(map.address_of(Field::Setpoint), 16386);
        assert_eq!(map.address_of(Field::Pressure), 16388);
        assert_eq!(map.address_of(Field::SetpointReached), 16390);
        assert_eq!(map.address_of(Field::Leak), 16391);
        assert_eq!(map.address_of(Field::OverPressure), 16392);
        assert_eq!(map.address_of(Field::SensorError), 16393);
        assert_eq!(map.address_of(Field::SetpointError), 16394);
        assert_eq!(map.address_of(Field::Success), 16395);
        assert_eq!(map.address_of(Field::Fail), 16396);
    }

    #[test]
    fn block_must_end_inside_the_address_space() {
        assert!(RegisterMap::checked(DEFAULT_BASE_ADDRESS).is_some());
        assert!(RegisterMap::checked(65523).is_some());
        assert!(RegisterMap::checked(65524).is_none());
        assert!(!RegisterMap::new(65530).fits_address_space());
    }

    #[test]
    fn spec_lookup_agrees_with_table() {
        let map = RegisterMap::default();
        for spec in map.fields() {
            assert_eq!(map.spec(spec.field), *spec);
        }
    }

    #[test]
    fn integers_are_signed() {
        let map = RegisterMap::default();
        let block = [0xFFFFu16; 13];
        let value = map.decode(&map.spec(Field::Leak), &block).unwrap();
        assert_eq!(value, RegisterValue::Int(-1));
    }

    #[test]
    fn floats_decode_from_two_words() {
        let map = RegisterMap::default();
        let mut block = [0u16; 13];
        block[4] = 0x4049;
        block[5] = 0x0FDB;
        match map.decode(&map.spec(Field::Pressure), &block).unwrap() {
            RegisterValue::Float(v) => assert!((v - std::f32::consts::PI).abs() < 1e-6),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn short_block_reports_the_failing_field() {
        let map = RegisterMap::default();
        let block = [0u16; 5];
        let err = map.decode(&map.spec(Field::Pressure), &block).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                field: Field::Pressure,
                needed: 6,
                available: 5
            }
        );
    }
}
