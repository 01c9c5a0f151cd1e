// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Word-swapped IEEE-754 float codec
//!
//! The controller stores a 32-bit float in two consecutive holding registers,
//! high word first. Reassembled on a little-endian host the byte sequence is
//! `[low.lo, low.hi, high.lo, high.hi]`, which is the plain `(high << 16) | low`
//! bit pattern. No rounding or clamping is applied: NaN and infinities decode
//! to whatever the raw bits spell.

/// Number of registers occupied by one encoded float.
pub const FLOAT_SPAN: u16 = 2;

/// Decode a float from its high and low register words.
pub fn decode_f32(high: u16, low: u16) -> f32 {
    let high = high.to_le_bytes();
    let low = low.to_le_bytes();
    f32::from_le_bytes([low[0], low[1], high[0], high[1]])
}

/// Encode a float into `[high, low]` register words, the inverse of [`decode_f32`].
pub fn encode_f32(value: f32) -> [u16; 2] {
    let bytes = value.to_le_bytes();
    let low = u16::from_le_bytes([bytes[0], bytes[1]]);
    let high = u16::from_le_bytes([bytes[2], bytes[3]]);
    [high, low]
}

/// Decode the float starting at `offset` inside a register block.
///
/// Returns `None` when the block does not hold both words.
pub fn decode_f32_at(registers: &[u16], offset: usize) -> Option<f32> {
    match registers.get(offset..offset + FLOAT_SPAN as usize) {
        Some([high, low]) => Some(decode_f32(*high, *low)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decodes_word_swapped_pi() {
        let value = decode_f32(0x4049, 0x0FDB);
        let expected = f32::from_le_bytes([0xDB, 0x0F, 0x49, 0x40]);
        assert_eq!(value.to_bits(), expected.to_bits());
        assert!((value - std::f32::consts::PI).abs() < 1e-6);
    }

    #[test]
    fn swapping_the_words_gives_a_different_value() {
        let swapped = decode_f32(0x0FDB, 0x4049);
        assert!((swapped - std::f32::consts::PI).abs() > 1.0);
    }

    #[test]
    fn encode_puts_high_word_first() {
        assert_eq!(encode_f32(std::f32::consts::PI), [0x4049, 0x0FDB]);
        assert_eq!(encode_f32(0.0), [0x0000, 0x0000]);
        assert_eq!(encode_f32(1.0), [0x3F80, 0x0000]);
    }

    #[test]
    fn round_trip_is_bit_exact() {
        let samples = [
            0.0f32,
            -0.0,
            1.0,
            -1.0,
            0.1,
            2.5e-3,
            6.0,
            123.456,
            -98765.43,
            f32::MIN_POSITIVE,
            f32::MAX,
            f32::MIN,
            1.0e-40, // subnormal
        ];
        for value in samples {
            let [high, low] = encode_f32(value);
            assert_eq!(decode_f32(high, low).to_bits(), value.to_bits(), "{value}");
        }
    }

    proptest! {
        #[test]
        fn finite_values_round_trip_bit_exactly(
            value in any::<u32>()
                .prop_map(f32::from_bits)
                .prop_filter("finite values only", |v| v.is_finite())
        ) {
            let [high, low] = encode_f32(value);
            prop_assert_eq!(decode_f32(high, low).to_bits(), value.to_bits());
        }

        #[test]
        fn register_words_survive_decode_then_encode(high in any::<u16>(), low in any::<u16>()) {
            let value = decode_f32(high, low);
            prop_assert_eq!(value.to_bits(), (u32::from(high) << 16) | u32::from(low));
            prop_assert_eq!(encode_f32(value), [high, low]);
        }
    }

    #[test]
    fn special_patterns_are_not_sanitised() {
        assert!(decode_f32(0x7FC0, 0x0000).is_nan());
        assert_eq!(decode_f32(0x7F80, 0x0000), f32::INFINITY);
        assert_eq!(decode_f32(0xFF80, 0x0000), f32::NEG_INFINITY);
    }

    #[test]
    fn decode_at_offset_checks_bounds() {
        let block = [0u16, 0x4049, 0x0FDB];
        assert!(decode_f32_at(&block, 1).is_some());
        assert!(decode_f32_at(&block, 2).is_none());
        assert!(decode_f32_at(&block, 7).is_none());
    }
}
