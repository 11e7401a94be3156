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

use crate::error::StemlabError;
use log::trace;

/// Word-level access to the address space of one module.
///
/// Offsets are relative to the module's base address.
pub trait RegisterBus {
    fn read_words(&self, offset: u32, length: usize) -> Result<Vec<u32>, StemlabError>;
    fn write_words(&self, offset: u32, values: &[u32]) -> Result<(), StemlabError>;
}

/// How the bits of a register are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantics {
    /// The whole register is one unsigned number of `width` bits.
    Integer,
    /// A single bit of a shared word. Writes read-modify-write the word.
    Bit(u32),
    /// The bits selected by a mask. Writes read-modify-write the word.
    Bitfield(u32),
    /// Fixed by the FPGA design. Read once, never written.
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub address: u32,
    pub width: u32,
    pub semantics: Semantics,
}

fn width_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

impl Register {
    pub const fn integer(address: u32, width: u32) -> Register {
        Register {
            address,
            width,
            semantics: Semantics::Integer,
        }
    }

    pub const fn bit(address: u32, bit: u32) -> Register {
        Register {
            address,
            width: 1,
            semantics: Semantics::Bit(bit),
        }
    }

    pub const fn bitfield(address: u32, mask: u32) -> Register {
        Register {
            address,
            width: 32,
            semantics: Semantics::Bitfield(mask),
        }
    }

    pub const fn constant(address: u32) -> Register {
        Register {
            address,
            width: 32,
            semantics: Semantics::Constant,
        }
    }

    /// Number of consecutive 32-bit words the register spans.
    pub fn words(&self) -> usize {
        match self.semantics {
            Semantics::Integer => self.width.div_ceil(32).max(1) as usize,
            _ => 1,
        }
    }

    /// Read the raw register value, already reduced to its bits.
    pub fn read(&self, bus: &dyn RegisterBus) -> Result<u64, StemlabError> {
        let words = bus.read_words(self.address, self.words())?;
        if words.len() != self.words() {
            return Err(StemlabError::Internal(format!(
                "expected {} words from 0x{:X}, got {}",
                self.words(),
                self.address,
                words.len()
            )));
        }
        // multi-word registers are stored low word first
        let raw = words
            .iter()
            .rev()
            .fold(0u64, |acc, word| (acc << 32) | *word as u64);
        let value = match self.semantics {
            Semantics::Integer | Semantics::Constant => raw & width_mask(self.width),
            Semantics::Bit(bit) => (raw >> bit) & 1,
            Semantics::Bitfield(mask) => raw & mask as u64,
        };
        trace!("Register 0x{:X} reads {value}", self.address);
        Ok(value)
    }

    /// Write a raw register value.
    ///
    /// # Returns: `Result<(), StemlabError>`
    /// * `Ok(())` - Value written
    /// * `Err(StemlabError::ReadOnly)` - The register is a constant
    /// * `Err(StemlabError)` - Transport failure from the bus
    pub fn write(&self, bus: &dyn RegisterBus, value: u64) -> Result<(), StemlabError> {
        trace!("Register 0x{:X} <- {value}", self.address);
        match self.semantics {
            Semantics::Integer => {
                let value = value & width_mask(self.width);
                let words: Vec<u32> = (0..self.words())
                    .map(|i| (value >> (32 * i)) as u32)
                    .collect();
                bus.write_words(self.address, &words)
            }
            Semantics::Bit(bit) => {
                let current = self.read_word(bus)?;
                let updated = if value != 0 {
                    current | (1 << bit)
                } else {
                    current & !(1 << bit)
                };
                bus.write_words(self.address, &[updated])
            }
            Semantics::Bitfield(mask) => {
                let current = self.read_word(bus)?;
                let updated = (current & !mask) | (value as u32 & mask);
                bus.write_words(self.address, &[updated])
            }
            Semantics::Constant => Err(StemlabError::ReadOnly(format!(
                "constant register at 0x{:X}",
                self.address
            ))),
        }
    }

    fn read_word(&self, bus: &dyn RegisterBus) -> Result<u32, StemlabError> {
        bus.read_words(self.address, 1)?
            .first()
            .copied()
            .ok_or_else(|| {
                StemlabError::Internal(format!("empty read from 0x{:X}", self.address))
            })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use googletest::prelude::*;
    use rstest::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Register map without a network behind it.
    #[derive(Default)]
    pub(crate) struct FakeBus {
        pub words: RefCell<HashMap<u32, u32>>,
    }

    impl RegisterBus for FakeBus {
        fn read_words(&self, offset: u32, length: usize) -> Result<Vec<u32>, StemlabError> {
            let words = self.words.borrow();
            Ok((0..length as u32)
                .map(|i| words.get(&(offset + 4 * i)).copied().unwrap_or_default())
                .collect())
        }

        fn write_words(&self, offset: u32, values: &[u32]) -> Result<(), StemlabError> {
            let mut words = self.words.borrow_mut();
            for (i, value) in values.iter().enumerate() {
                words.insert(offset + 4 * i as u32, *value);
            }
            Ok(())
        }
    }

    #[gtest]
    #[rstest]
    #[case::set_bit_one(Register::bit(0x104, 1), 1, 0b0101, 0b0111)]
    #[case::clear_bit_zero(Register::bit(0x104, 0), 0, 0b0101, 0b0100)]
    #[case::bitfield(Register::bitfield(0x8, 0xF0), 0xAB, 0x1234, 0x12A4)]
    fn read_modify_write_keeps_other_bits(
        #[case] register: Register,
        #[case] value: u64,
        #[case] before: u32,
        #[case] after: u32,
    ) {
        let bus = FakeBus::default();
        bus.words.borrow_mut().insert(register.address, before);
        register.write(&bus, value).expect("write failed");
        assert_that!(bus.words.borrow()[&register.address], eq(after));
    }

    #[gtest]
    fn wide_registers_span_words_low_first() {
        let bus = FakeBus::default();
        let register = Register::integer(0x10, 48);
        register
            .write(&bus, 0x1234_5678_9ABC)
            .expect("write failed");
        assert_that!(bus.words.borrow()[&0x10], eq(0x5678_9ABC));
        assert_that!(bus.words.borrow()[&0x14], eq(0x1234));
        assert_that!(register.read(&bus), ok(eq(&0x1234_5678_9ABCu64)));
    }

    #[gtest]
    fn integer_masks_to_width() {
        let bus = FakeBus::default();
        bus.words.borrow_mut().insert(0x100, 0xFFFF_FFFF);
        assert_that!(Register::integer(0x100, 10).read(&bus), ok(eq(&0x3FFu64)));
    }

    #[gtest]
    fn constants_reject_writes() {
        let bus = FakeBus::default();
        let result = Register::constant(0x208).write(&bus, 1);
        assert_that!(
            &result,
            err(displays_as(contains_substring("StemlabError::ReadOnly")))
        );
    }
}
