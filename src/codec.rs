// This file is part of stemlabd, an application to drive the signal-processing modules of a StemLab FPGA board over the network.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// stemlabd is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// stemlabd is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

//! Fixed-point conversions between floating point values and two's-complement register words.
//!
//! The FPGA stores filter coefficients as signed integers of up to 64 bits with a binary point
//! `shift` bits from the right, split over two 32-bit words. DSP samples and gains use the
//! same representation in a single word with fewer bits. Nothing in here can fail: values that
//! do not fit wrap around exactly the way the hardware register would.

fn mask(bits: u32) -> u128 {
    (1u128 << bits) - 1
}

/// Encode `value` as a `bit_length`-bit two's-complement number with `shift` fractional bits.
///
/// Rounds half away from zero and wraps silently on overflow.
///
/// # Arguments
///
/// * `value` - The real number to encode
/// * `bit_length` - Total width of the register, 1 to 64 bits
/// * `shift` - Position of the binary point
///
/// # Returns: `(u32, u32)`
/// * `(high, low)` - The upper and lower 32-bit words of the encoded number
pub fn encode(value: f64, bit_length: u32, shift: u32) -> (u32, u32) {
    debug_assert!((1..=64).contains(&bit_length));
    // f64 -> i128 saturates, which is wider than anything a register can hold
    let scaled = (value * 2f64.powi(shift as i32)).round() as i128;
    let wrapped = (scaled as u128) & mask(bit_length);
    let high = ((wrapped >> 32) & 0xFFFF_FFFF) as u32;
    let low = (wrapped & 0xFFFF_FFFF) as u32;
    (high, low)
}

/// Decode a `bit_length`-bit two's-complement number with `shift` fractional bits.
///
/// For registers of 32 bits or fewer the high word carries no information and is ignored.
pub fn decode(high: u32, low: u32, bit_length: u32, shift: u32) -> f64 {
    debug_assert!((1..=64).contains(&bit_length));
    let high = if bit_length > 32 {
        high as u128 & mask(bit_length - 32)
    } else {
        0
    };
    let raw = ((high << 32) | low as u128) & mask(bit_length);
    sign_extend(raw as u64, bit_length) as f64 / 2f64.powi(shift as i32)
}

/// Interpret the lowest `bits` bits of `raw` as a two's-complement number.
pub fn sign_extend(raw: u64, bits: u32) -> i64 {
    let raw = raw as u128 & mask(bits);
    if raw >> (bits - 1) != 0 {
        (raw as i128 - (1i128 << bits)) as i64
    } else {
        raw as i64
    }
}

/// Two's-complement representation of `value` in `bits` bits, saturating instead of wrapping.
pub fn to_twos_complement(value: i64, bits: u32) -> u64 {
    let max = (1i128 << (bits - 1)) - 1;
    let min = -(1i128 << (bits - 1));
    let clamped = (value as i128).clamp(min, max);
    (clamped as u128 & mask(bits)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use rstest::*;

    #[gtest]
    #[rstest]
    #[case::fourteen_bit(14, 0, 1000.0)]
    #[case::fourteen_bit_negative(14, 4, -100.5625)]
    #[case::thirty_two_bit(32, 16, -1234.25)]
    #[case::sixty_four_bit(64, 48, 0.123456789)]
    #[case::sixty_four_bit_negative(64, 48, -7.5)]
    #[case::sixty_four_bit_no_shift(64, 0, -3_000_000_000.0)]
    fn decode_recovers_encoded_value(#[case] bits: u32, #[case] shift: u32, #[case] value: f64) {
        let (high, low) = encode(value, bits, shift);
        let decoded = decode(high, low, bits, shift);
        assert!(
            (decoded - value).abs() <= 2f64.powi(-(shift as i32)),
            "{value} came back as {decoded}"
        );
    }

    #[gtest]
    fn splits_words() {
        assert_that!(encode(1.0, 64, 32), eq((1, 0)));
        assert_that!(encode(-1.0, 64, 0), eq((0xFFFF_FFFF, 0xFFFF_FFFF)));
        assert_that!(encode(0.5, 64, 1), eq((0, 1)));
    }

    #[gtest]
    fn rounds_half_away_from_zero() {
        assert_that!(encode(2.5, 32, 0), eq((0, 3)));
        assert_that!(encode(-2.5, 32, 0), eq((0, (-3i32) as u32)));
    }

    #[gtest]
    fn wraps_without_error() {
        // 8192 does not fit in 14 signed bits and wraps to the most negative value
        let (high, low) = encode(8192.0, 14, 0);
        assert_that!((high, low), eq((0, 0x2000)));
        assert_that!(decode(high, low, 14, 0), eq(-8192.0));
    }

    #[gtest]
    fn narrow_decode_ignores_high_word() {
        assert_that!(decode(0xDEAD_BEEF, 0x3FFF, 14, 0), eq(-1.0));
    }

    #[gtest]
    #[rstest]
    #[case::zero(0, 0)]
    #[case::positive(8191, 0x1FFF)]
    #[case::negative(-1, 0x3FFF)]
    #[case::most_negative(-8192, 0x2000)]
    #[case::saturates_high(10_000, 0x1FFF)]
    #[case::saturates_low(-10_000, 0x2000)]
    fn fourteen_bit_sample_words(#[case] value: i64, #[case] word: u64) {
        assert_that!(to_twos_complement(value, 14), eq(word));
        assert_that!(sign_extend(word, 14), eq(value.clamp(-8192, 8191)));
    }
}
