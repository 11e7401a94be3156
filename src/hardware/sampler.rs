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

//! Momentary samples of every signal on the DSP bus.

use crate::attributes::{Attribute, FixedPoint, Kind, Register};
use crate::error::StemlabError;
use crate::hardware::dsp::{DSP_BASE_ADDRESS, DSP_INPUTS, DSP_STRIDE};
use crate::modules::{Module, ModuleClass, ModuleContext, ModuleKind};
use log::trace;
use serde::Serialize;
use std::any::Any;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

pub struct Sampler;

impl ModuleKind for Sampler {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn sampler_class() -> &'static ModuleClass {
    static CLASS: OnceLock<ModuleClass> = OnceLock::new();
    CLASS.get_or_init(|| {
        DSP_INPUTS
            .iter()
            .fold(ModuleClass::builder("sampler"), |builder, &(signal, number)| {
                builder.attribute(
                    Attribute::register(
                        signal,
                        Kind::Fixed(FixedPoint::signed(14, 2f64.powi(13) - 1.0)),
                        Register::integer(0x10 + number * DSP_STRIDE, 14),
                    )
                    .read_only()
                    .doc("current value of the signal"),
                )
            })
            .build()
    })
}

pub fn new_sampler(name: &str, context: ModuleContext) -> Result<Module, StemlabError> {
    Ok(Module::new(
        name,
        DSP_BASE_ADDRESS,
        sampler_class(),
        Arc::new(Sampler),
        context,
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalStats {
    pub mean: f64,
    pub stddev: f64,
    pub max: f64,
    pub min: f64,
}

/// Sample `signal` for `duration`, at least once.
pub fn stats(
    module: &mut Module,
    signal: &str,
    duration: Duration,
) -> Result<SignalStats, StemlabError> {
    let start = Instant::now();
    let mut samples = 0usize;
    let (mut sum, mut sum_of_squares) = (0.0, 0.0);
    let (mut max, mut min) = (f64::NEG_INFINITY, f64::INFINITY);
    while samples == 0 || start.elapsed() < duration {
        let value = module.get(signal)?.as_f64()?;
        samples += 1;
        sum += value;
        sum_of_squares += value * value;
        max = max.max(value);
        min = min.min(value);
    }
    trace!("Took {samples} samples of {signal}");
    let n = samples as f64;
    let mean = sum / n;
    // rounding can make the variance of a constant signal slightly negative
    let variance = (sum_of_squares / n - mean * mean).max(0.0);
    Ok(SignalStats {
        mean,
        stddev: variance.sqrt(),
        max,
        min,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Value;
    use crate::modules::tests::connected_context;
    use crate::simulator::MockMonitorServer;
    use googletest::prelude::*;

    const IN1: u32 = 0x4030_0000 + 0x10 + 10 * 0x1_0000;

    #[gtest]
    fn samples_are_scaled_to_volts() {
        let server = MockMonitorServer::start().expect("failed to start simulator");
        server.set_register(IN1, 0x3FFF);
        let mut sampler =
            new_sampler("sampler", connected_context(&server)).expect("failed to create sampler");
        assert_that!(sampler.get("in1"), ok(eq(&Value::Float(-1.0 / 8191.0))));
    }

    #[gtest]
    fn samples_cannot_be_written() {
        let server = MockMonitorServer::start().expect("failed to start simulator");
        let mut sampler =
            new_sampler("sampler", connected_context(&server)).expect("failed to create sampler");
        let result = sampler.set("in2", 0.5);
        assert_that!(
            &result,
            err(displays_as(contains_substring("StemlabError::ReadOnly")))
        );
    }

    #[gtest]
    fn constant_signal_has_no_spread() {
        let server = MockMonitorServer::start().expect("failed to start simulator");
        server.set_register(IN1, 4096);
        let mut sampler =
            new_sampler("sampler", connected_context(&server)).expect("failed to create sampler");
        let stats = stats(&mut sampler, "in1", Duration::ZERO).expect("no stats");
        let expected = 4096.0 / 8191.0;
        assert_that!(stats.mean, eq(expected));
        assert_that!(stats.max, eq(expected));
        assert_that!(stats.min, eq(expected));
        assert_that!(stats.stddev, eq(0.0));
    }
}
