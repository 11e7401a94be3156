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

//! Cascaded first-order low/high-pass filters in front of a DSP module.
//!
//! Each stage occupies one byte of the filter register: bit 7 switches the stage on, bit 6
//! turns it into a high-pass and the low bits hold the shift that sets the cutoff. The number
//! of stages, the shift width and the minimum bandwidth are constants of the FPGA design.

use crate::attributes::Register;
use crate::error::StemlabError;
use crate::modules::Module;
use std::f64::consts::PI;

const CLOCK_FREQUENCY: f64 = 125e6;
const STAGE_ON: u64 = 0x80;
const STAGE_HIGHPASS: u64 = 0x40;

/// Empirical factors that make the cutoff match an analog Butterworth model up to ~5 MHz.
const CORRECTION_FACTORS: [(f64, f64); 9] = [
    (0.5, 0.7),
    (0.25, 1.65),
    (0.125, 1.17),
    (0.0625, 1.08),
    (0.03125, 1.04),
    (0.015625, 1.02),
    (0.0078125, 1.01),
    (0.001953125, 1.0),
    (0.00390625, 1.0),
];

fn correction_factor(alpha: f64) -> Option<f64> {
    CORRECTION_FACTORS
        .iter()
        .find(|(a, _)| *a == alpha)
        .map(|(_, factor)| *factor)
}

/// Mirrors `clog2` of the verilog sources.
fn clog2(x: f64) -> i64 {
    if x < 2.0 {
        1
    } else if x > 2f64.powi(32) {
        -1
    } else if x > 2f64.powi(31) {
        32
    } else {
        x.log2().floor() as i64 + 1
    }
}

fn alpha_of(bandwidth: f64) -> f64 {
    1.0 - (-bandwidth.abs() * 2.0 * PI / CLOCK_FREQUENCY).exp()
}

/// Addresses of the constants describing a filter block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterConstants {
    pub stages: u32,
    pub shift_bits: u32,
    pub min_bandwidth: u32,
}

struct Layout {
    stages: u32,
    shift_bits: u32,
    max_shift: i64,
}

impl FilterConstants {
    fn layout(&self, module: &mut Module) -> Result<Layout, StemlabError> {
        let stages = module.read_register(Register::constant(self.stages))? as u32;
        let shift_bits = module.read_register(Register::constant(self.shift_bits))? as u32;
        let min_bandwidth = module.read_register(Register::constant(self.min_bandwidth))?;
        if min_bandwidth == 0 {
            return Err(StemlabError::Internal(format!(
                "filter of {} reports a minimum bandwidth of 0",
                module.name()
            )));
        }
        if stages > 4 || shift_bits > 6 {
            return Err(StemlabError::Internal(format!(
                "filter of {} reports {stages} stages of {shift_bits} shift bits",
                module.name()
            )));
        }
        Ok(Layout {
            stages,
            shift_bits,
            max_shift: clog2(CLOCK_FREQUENCY / min_bandwidth as f64),
        })
    }

    fn stage_bandwidth(layout: &Layout, code: u64) -> f64 {
        if code & STAGE_ON == 0 {
            return 0.0;
        }
        let shift = code & ((1 << layout.shift_bits) - 1);
        let alpha = 2f64.powi(shift as i32) / 2f64.powi(layout.max_shift as i32);
        let mut bandwidth = -(1.0 - alpha).ln() / 2.0 / PI * CLOCK_FREQUENCY;
        if let Some(factor) = correction_factor(alpha) {
            bandwidth *= factor;
        }
        if code & STAGE_HIGHPASS != 0 {
            bandwidth = -bandwidth;
        }
        bandwidth
    }

    /// Cutoff of every stage, negative for high-pass and 0 for a bypassed stage.
    pub fn bandwidths(&self, module: &mut Module, raw: u64) -> Result<Vec<f64>, StemlabError> {
        let layout = self.layout(module)?;
        Ok((0..layout.stages)
            .map(|i| Self::stage_bandwidth(&layout, (raw >> (8 * i)) & 0xFF))
            .collect())
    }

    /// Register value implementing the requested cutoffs. Missing stages are bypassed.
    pub fn register_value(
        &self,
        module: &mut Module,
        bandwidths: &[f64],
    ) -> Result<u64, StemlabError> {
        let layout = self.layout(module)?;
        let max_code = (1i64 << layout.shift_bits) - 1;
        let mut raw = 0u64;
        for (i, requested) in bandwidths.iter().take(layout.stages as usize).enumerate() {
            let mut bandwidth = *requested;
            if bandwidth == 0.0 {
                continue;
            }
            let mut alpha = alpha_of(bandwidth);
            if let Some(factor) = correction_factor(alpha) {
                bandwidth /= factor;
                alpha = alpha_of(bandwidth);
            }
            let shift = (alpha * 2f64.powi(layout.max_shift as i32))
                .log2()
                .round()
                .clamp(0.0, max_code as f64) as u64;
            let mut code = shift | STAGE_ON;
            if bandwidth < 0.0 {
                code |= STAGE_HIGHPASS;
            }
            raw |= code << (8 * i);
        }
        Ok(raw)
    }

    /// All cutoffs the hardware can implement, ascending, high-passes first.
    pub fn valid_frequencies(&self, module: &mut Module) -> Result<Vec<f64>, StemlabError> {
        let layout = self.layout(module)?;
        let positive: Vec<f64> = (0..(layout.max_shift - 2).max(0) as u64)
            .map(|shift| Self::stage_bandwidth(&layout, shift | STAGE_ON))
            .collect();
        Ok(positive
            .iter()
            .rev()
            .map(|bandwidth| -bandwidth)
            .chain(std::iter::once(0.0))
            .chain(positive.iter().copied())
            .collect())
    }

    /// Snap every requested cutoff to the nearest one the hardware implements.
    pub fn closest_valid(
        &self,
        module: &mut Module,
        requested: &[f64],
    ) -> Result<Vec<f64>, StemlabError> {
        let valid = self.valid_frequencies(module)?;
        Ok(requested
            .iter()
            .map(|bandwidth| {
                valid
                    .iter()
                    .copied()
                    .min_by(|a, b| (a - bandwidth).abs().total_cmp(&(b - bandwidth).abs()))
                    .unwrap_or(0.0)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{FilterConstants, clog2};
    use crate::modules::tests::simulated_module;
    use googletest::prelude::*;
    use rstest::*;

    const CONSTANTS: FilterConstants = FilterConstants {
        stages: 0x220,
        shift_bits: 0x224,
        min_bandwidth: 0x228,
    };

    #[gtest]
    #[rstest]
    #[case::below_two(1.5, 1)]
    #[case::power_of_two(1024.0, 11)]
    #[case::between(1000.0, 10)]
    #[case::huge(1e10, -1)]
    fn clog2_mirrors_verilog(#[case] x: f64, #[case] expected: i64) {
        assert_that!(clog2(x), eq(expected));
    }

    #[gtest]
    fn valid_frequencies_are_symmetric_around_zero() {
        let (_server, mut module) = simulated_module(&[(0x220, 1), (0x224, 5), (0x228, 10)]);
        let valid = CONSTANTS
            .valid_frequencies(&mut module)
            .expect("failed to list frequencies");
        // clog2(125e6 / 10) = 24, so 22 positive cutoffs
        assert_that!(valid.len(), eq(45));
        assert_that!(valid[22], eq(0.0));
        assert_that!(valid[0], eq(-valid[44]));
        assert!(valid.windows(2).all(|w| w[0] < w[1]));
    }

    #[gtest]
    fn snapped_cutoffs_survive_the_register() {
        let (_server, mut module) = simulated_module(&[(0x220, 2), (0x224, 5), (0x228, 10)]);
        let snapped = CONSTANTS
            .closest_valid(&mut module, &[1000.0, -20000.0])
            .expect("failed to snap");
        let raw = CONSTANTS
            .register_value(&mut module, &snapped)
            .expect("failed to encode");
        assert_ne!((raw >> 8) & 0x40, 0, "second stage is a high-pass");
        let decoded = CONSTANTS
            .bandwidths(&mut module, raw)
            .expect("failed to decode");
        assert_that!(decoded.len(), eq(2));
        for (got, want) in decoded.iter().zip(&snapped) {
            assert!((got - want).abs() <= want.abs() * 1e-9, "{got} != {want}");
        }
    }

    #[gtest]
    fn zero_bypasses_a_stage() {
        let (_server, mut module) = simulated_module(&[(0x220, 2), (0x224, 5), (0x228, 10)]);
        let raw = CONSTANTS
            .register_value(&mut module, &[0.0])
            .expect("failed to encode");
        assert_that!(raw, eq(0));
        assert_that!(CONSTANTS.bandwidths(&mut module, 0), ok(eq(&vec![0.0, 0.0])));
    }

    #[gtest]
    fn zero_minimum_bandwidth_is_reported() {
        let (_server, mut module) = simulated_module(&[(0x220, 1), (0x224, 5)]);
        let result = CONSTANTS.valid_frequencies(&mut module);
        assert_that!(
            &result,
            err(displays_as(contains_substring("minimum bandwidth of 0")))
        );
    }
}
