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

//! Attributes shared by all modules sitting on the DSP signal bus.

use crate::attributes::{Attribute, FilterConstants, Kind, Register, Value};
use crate::error::StemlabError;
use crate::modules::{Module, ModuleClass};
use std::sync::OnceLock;

/// Every signal on the DSP bus and the number of the module producing it.
pub const DSP_INPUTS: &[(&str, u32)] = &[
    ("in1", 10),
    ("in2", 11),
    ("out1", 12),
    ("out2", 13),
    ("iq0", 5),
    ("iq1", 6),
    ("iq2", 7),
    ("iq2_2", 14),
    ("pid0", 0),
    ("pid1", 1),
    ("pid2", 2),
    ("asg0", 8),
    ("asg1", 9),
    ("trig", 3),
    ("iir", 4),
    ("off", 15),
];

pub const OUTPUT_DIRECTS: &[(&str, u32)] = &[("off", 0), ("out1", 1), ("out2", 2), ("both", 3)];

pub const DSP_BASE_ADDRESS: u32 = 0x4030_0000;
pub const DSP_STRIDE: u32 = 0x1_0000;

pub const INPUT_FILTER: FilterConstants = FilterConstants {
    stages: 0x220,
    shift_bits: 0x224,
    min_bandwidth: 0x228,
};

pub fn dsp_number(name: &str) -> Result<u32, StemlabError> {
    DSP_INPUTS
        .iter()
        .find(|(signal, _)| *signal == name)
        .map(|(_, number)| *number)
        .ok_or_else(|| StemlabError::UnknownModule(name.to_string()))
}

pub fn dsp_base_address(name: &str) -> Result<u32, StemlabError> {
    Ok(DSP_BASE_ADDRESS + dsp_number(name)? * DSP_STRIDE)
}

pub fn dsp_class() -> &'static ModuleClass {
    static CLASS: OnceLock<ModuleClass> = OnceLock::new();
    CLASS.get_or_init(|| {
        ModuleClass::builder("dsp")
            .attribute(
                Attribute::register("input", Kind::Select(DSP_INPUTS), Register::integer(0x0, 32))
                    .doc("selects the input signal of the module"),
            )
            .attribute(
                Attribute::register(
                    "output_direct",
                    Kind::Select(OUTPUT_DIRECTS),
                    Register::integer(0x4, 32),
                )
                .doc("selects to which analog output the module signal is sent directly"),
            )
            .attribute(
                Attribute::register("out1_saturated", Kind::Bool, Register::bit(0x8, 0))
                    .read_only()
                    .doc("True if out1 is saturated"),
            )
            .attribute(
                Attribute::register("out2_saturated", Kind::Bool, Register::bit(0x8, 1))
                    .read_only()
                    .doc("True if out2 is saturated"),
            )
            .setup_attributes(&["input", "output_direct"])
            .build()
    })
}

fn inputfilter_options(module: &mut Module) -> Result<Value, StemlabError> {
    Ok(Value::FloatList(INPUT_FILTER.valid_frequencies(module)?))
}

/// DSP modules with a cascade of first-order filters at their input.
pub fn filter_class() -> &'static ModuleClass {
    static CLASS: OnceLock<ModuleClass> = OnceLock::new();
    CLASS.get_or_init(|| {
        ModuleClass::builder("filter")
            .extends(dsp_class())
            .attribute(
                Attribute::register(
                    "inputfilter",
                    Kind::Filter(INPUT_FILTER),
                    Register::integer(0x120, 32),
                )
                .doc(
                    "Input filter bandwidths [Hz]. 0 = off, positive bandwidth <=> lowpass, \
                    negative bandwidth <=> highpass.",
                ),
            )
            .attribute(Attribute::computed(
                "inputfilter_options",
                Kind::FloatList,
                inputfilter_options,
                None,
            ))
            .build()
    })
}
