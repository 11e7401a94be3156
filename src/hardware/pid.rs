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

//! Proportional-integral controllers.

use crate::attributes::{Attribute, FixedPoint, Kind, Register};
use crate::error::StemlabError;
use crate::hardware::dsp::{dsp_base_address, filter_class};
use crate::modules::{Module, ModuleClass, ModuleContext, ModuleKind};
use num_complex::Complex64;
use std::any::Any;
use std::f64::consts::PI;
use std::sync::{Arc, OnceLock};

/// Cycles from the input to the output of the module.
pub const MODULE_DELAY: u32 = 3;
const CYCLE: f64 = 8e-9;
const P_SHIFT: i32 = 12;
const I_SHIFT: i32 = 32;
const GAIN_BITS: u32 = 24;

/// The register values of a pid are its setup, there is nothing to derive.
pub struct Pid;

impl ModuleKind for Pid {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn voltage(bits: u32) -> Kind {
    Kind::Fixed(FixedPoint::signed(bits, 2f64.powi(13)))
}

pub fn pid_class() -> &'static ModuleClass {
    static CLASS: OnceLock<ModuleClass> = OnceLock::new();
    CLASS.get_or_init(|| {
        let i_norm = 2f64.powi(I_SHIFT) * 2.0 * PI * CYCLE;
        ModuleClass::builder("pid")
            .extends(filter_class())
            .attribute(
                Attribute::register(
                    "ival",
                    Kind::Fixed(FixedPoint::signed(16, 2f64.powi(13)).bounded(-4.0, 4.0)),
                    Register::integer(0x100, 16),
                )
                .doc("Current value of the integrator memory (i.e. pid output voltage offset)"),
            )
            .attribute(
                Attribute::register("setpoint", voltage(14), Register::integer(0x104, 14))
                    .doc("pid setpoint [volts]"),
            )
            .attribute(
                Attribute::register("min_voltage", voltage(14), Register::integer(0x124, 14))
                    .doc("minimum output signal [volts]"),
            )
            .attribute(
                Attribute::register("max_voltage", voltage(14), Register::integer(0x128, 14))
                    .doc("maximum output signal [volts]"),
            )
            .attribute(
                Attribute::register(
                    "p",
                    Kind::Fixed(FixedPoint::signed(GAIN_BITS, 2f64.powi(P_SHIFT)).gain()),
                    Register::integer(0x108, GAIN_BITS),
                )
                .doc("pid proportional gain [1]"),
            )
            .attribute(
                Attribute::register(
                    "i",
                    Kind::Fixed(FixedPoint::signed(GAIN_BITS, i_norm).gain()),
                    Register::integer(0x10C, GAIN_BITS),
                )
                .doc("pid integral unity-gain frequency [Hz]"),
            )
            .setup_attributes(&[
                "input",
                "output_direct",
                "setpoint",
                "p",
                "i",
                "inputfilter",
                "max_voltage",
                "min_voltage",
            ])
            .build()
    })
}

pub fn new_pid(name: &str, context: ModuleContext) -> Result<Module, StemlabError> {
    Ok(Module::new(
        name,
        dsp_base_address(name)?,
        pid_class(),
        Arc::new(Pid),
        context,
    ))
}

/// Modelled open-loop transfer function of a pid at `frequencies` [Hz].
///
/// Takes the current gains, the input filters and the propagation delay into account. Analog
/// paths add roughly 200 ns that can be passed as `extra_delay` [s].
pub fn transfer_function(
    module: &mut Module,
    frequencies: &[f64],
    extra_delay: f64,
) -> Result<Vec<Complex64>, StemlabError> {
    let p = module.get("p")?.as_f64()?;
    let i = module.get("i")?.as_f64()?;
    let filters = module.get("inputfilter")?.to_float_list()?;
    let correction = module.frequency_correction();
    let j = Complex64::i();
    Ok(frequencies
        .iter()
        .map(|f| {
            let mut tf = i / (j * *f) * (-j * CYCLE * correction * *f * 2.0 * PI).exp() + p;
            let mut cycles = MODULE_DELAY;
            for bandwidth in &filters {
                if *bandwidth > 0.0 {
                    tf /= 1.0 + j * *f / *bandwidth;
                    cycles += 2;
                } else if *bandwidth < 0.0 {
                    tf /= 1.0 + j * *bandwidth / *f;
                    cycles += 1;
                }
            }
            let delay = cycles as f64 * CYCLE / correction + extra_delay;
            tf * (-j * delay * *f * 2.0 * PI).exp()
        })
        .collect())
}
