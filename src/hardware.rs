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

//! The signal-processing modules of the StemLab FPGA design.
//!
//! Every class registers itself under the name used in the `[modules]` section of the
//! configuration:
//! - `sampler` - momentary values of every DSP signal
//! - `pid` - proportional-integral controllers, numbered `pid0`..`pid2`
//! - `iir` - the biquad cascade programmed from poles and zeros
//! - `scope` - the two-channel trace recorder

pub mod dsp;
pub mod iir;
pub mod pid;
pub mod sampler;
pub mod scope;

use crate::modules::{ModuleEntry, register_module_class};

/// Register all hardware module classes.
///
/// Safe to call more than once; later registrations replace earlier ones.
pub fn register_modules() {
    register_module_class(
        "sampler",
        ModuleEntry {
            constructor: sampler::new_sampler,
            numbered: false,
        },
    );
    register_module_class(
        "pid",
        ModuleEntry {
            constructor: pid::new_pid,
            numbered: true,
        },
    );
    register_module_class(
        "iir",
        ModuleEntry {
            constructor: iir::new_iir,
            numbered: false,
        },
    );
    register_module_class(
        "scope",
        ModuleEntry {
            constructor: scope::new_scope,
            numbered: false,
        },
    );
}
