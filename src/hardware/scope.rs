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

//! Two-channel oscilloscope recording 2^14 samples per trace.
//!
//! # Acquisition
//!
//! Deriving the setup starts an acquisition: the write state machine is reset, the trigger
//! delay programmed and the trigger armed. With `trigger_source = "immediately"` the trace
//! starts right away and spans `0..duration`; otherwise it is centred on the trigger event
//! shifted by `trigger_delay`.
//!
//! `decimation` is the one register behind `sampling_time` and `duration`. Setting either of
//! those picks a power of two for it: the sampling time rounds down, the duration rounds up.
//!
//! A module that is taken over by an owner stops acquiring until its setup is derived again.

use crate::attributes::{Attribute, FixedPoint, Kind, Register, RegisterBus, Value};
use crate::codec::sign_extend;
use crate::error::StemlabError;
use crate::hardware::dsp::{DSP_BASE_ADDRESS, DSP_INPUTS, DSP_STRIDE};
use crate::modules::{Module, ModuleClass, ModuleContext, ModuleKind};
use log::{debug, info};
use serde::Serialize;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

pub const SCOPE_BASE_ADDRESS: u32 = 0x4010_0000;
/// Samples per channel and trace.
pub const DATA_LENGTH: usize = 1 << 14;
pub const MAX_DECIMATION: i64 = 1 << 16;
const CYCLE: f64 = 8e-9;

// the scope inputs are selected with the dsp numbers of the asg outputs
const INPUT1: u32 = DSP_BASE_ADDRESS + 8 * DSP_STRIDE - SCOPE_BASE_ADDRESS;
const INPUT2: u32 = DSP_BASE_ADDRESS + 9 * DSP_STRIDE - SCOPE_BASE_ADDRESS;

const TRIGGER_ARMED: Register = Register::bit(0x0, 0);
const RESET_WRITESTATE: Register = Register::bit(0x0, 1);
const TRIGGER_DELAY_RUNNING: Register = Register::bit(0x0, 2);
const TRIGGER_SOURCE: Register = Register::integer(0x4, 32);
const TRIGGER_DELAY: Register = Register::integer(0x10, 32);
const WRITE_POINTER_TRIGGER: Register = Register::integer(0x1C, 14);
const CH1_DATA: u32 = 0x1_0000;
const CH2_DATA: u32 = 0x2_0000;

pub const TRIGGER_SOURCES: &[(&str, u32)] = &[
    ("off", 0),
    ("immediately", 1),
    ("ch1_positive_edge", 2),
    ("ch1_negative_edge", 3),
    ("ch2_positive_edge", 4),
    ("ch2_negative_edge", 5),
    ("ext_positive_edge", 6),
    ("ext_negative_edge", 7),
    ("asg0", 8),
    ("asg1", 9),
    ("dsp", 10),
];

pub struct Scope {
    /// An acquisition was started and not halted since.
    acquiring: AtomicBool,
}

impl Scope {
    fn halt(&self, module: &mut Module) -> Result<(), StemlabError> {
        self.acquiring.store(false, Ordering::SeqCst);
        module.write_register(TRIGGER_ARMED, 0)?;
        module.write_register(TRIGGER_SOURCE, 0)?;
        debug!("{} halted", module.name());
        Ok(())
    }
}

impl ModuleKind for Scope {
    fn setup(&self, module: &mut Module) -> Result<(), StemlabError> {
        self.acquiring.store(true, Ordering::SeqCst);
        module.write_register(RESET_WRITESTATE, 1)?;
        let source = module.get("trigger_source")?;
        let source = source.as_str()?;
        let delay = if source == "immediately" {
            DATA_LENGTH as u64
        } else {
            let delay = module.get("trigger_delay")?.as_f64()?;
            let sampling_time = module.get("sampling_time")?.as_f64()?;
            let counts = (delay / sampling_time).round() as i64 + DATA_LENGTH as i64 / 2;
            // a delay of 0 never fires
            counts.clamp(1, u32::MAX as i64) as u64
        };
        module.write_register(TRIGGER_DELAY, delay)?;
        module.write_register(TRIGGER_ARMED, 1)?;
        // writing the source again is the software trigger of "immediately"
        module.write_register(TRIGGER_SOURCE, trigger_code(source)?)?;
        debug!("{} armed on {source} with a delay of {delay} samples", module.name());
        Ok(())
    }

    fn ownership_changed(
        &self,
        module: &mut Module,
        _old: Option<&str>,
        new: Option<&str>,
    ) -> Result<(), StemlabError> {
        if let Some(owner) = new {
            info!("{} taken over by {owner}, stopping the acquisition", module.name());
            self.halt(module)?;
        }
        Ok(())
    }

    fn clear(&self, module: &mut Module) -> Result<(), StemlabError> {
        self.halt(module)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn trigger_code(source: &str) -> Result<u64, StemlabError> {
    TRIGGER_SOURCES
        .iter()
        .find(|(name, _)| *name == source)
        .map(|(_, code)| *code as u64)
        .ok_or_else(|| StemlabError::Argument(format!("'{source}' is not a trigger source")))
}

fn decimations() -> impl DoubleEndedIterator<Item = i64> {
    (0..=16).map(|n| 1i64 << n)
}

fn power_of_two(_module: &mut Module, name: &'static str, value: Value) -> Result<Value, StemlabError> {
    let decimation = value.as_i64()?;
    if decimation.count_ones() != 1 {
        return Err(StemlabError::Argument(format!(
            "{name} must be a power of two up to {MAX_DECIMATION}, got {decimation}"
        )));
    }
    Ok(value)
}

fn get_sampling_time(module: &mut Module) -> Result<Value, StemlabError> {
    Ok(Value::Float(CYCLE * module.get("decimation")?.as_f64()?))
}

/// Longest sampling time not above the request, the shortest one if there is none.
fn set_sampling_time(module: &mut Module, value: Value) -> Result<(), StemlabError> {
    let requested = value.as_f64()?;
    let decimation = decimations()
        .rev()
        .find(|d| CYCLE * *d as f64 <= requested * (1.0 + 1e-9))
        .unwrap_or_else(|| {
            info!("Sampling time {requested} is shorter than possible, using {CYCLE}");
            1
        });
    module.set("decimation", decimation)
}

fn get_duration(module: &mut Module) -> Result<Value, StemlabError> {
    Ok(Value::Float(
        get_sampling_time(module)?.as_f64()? * DATA_LENGTH as f64,
    ))
}

/// Shortest duration not below the request, the longest one if there is none.
fn set_duration(module: &mut Module, value: Value) -> Result<(), StemlabError> {
    let requested = value.as_f64()?;
    let decimation = decimations()
        .find(|d| CYCLE * (*d * DATA_LENGTH as i64) as f64 >= requested * (1.0 - 1e-9))
        .unwrap_or_else(|| {
            info!("Duration {requested} is longer than possible, using the longest one");
            MAX_DECIMATION
        });
    module.set("decimation", decimation)
}

fn volts(bits: u32) -> Kind {
    Kind::Fixed(FixedPoint::signed(bits, 2f64.powi(13)))
}

pub fn scope_class() -> &'static ModuleClass {
    static CLASS: OnceLock<ModuleClass> = OnceLock::new();
    CLASS.get_or_init(|| {
        ModuleClass::builder("scope")
            .attribute(
                Attribute::register("input1", Kind::Select(DSP_INPUTS), Register::integer(INPUT1, 32))
                    .doc("selects the signal of channel 1"),
            )
            .attribute(
                Attribute::register("input2", Kind::Select(DSP_INPUTS), Register::integer(INPUT2, 32))
                    .doc("selects the signal of channel 2"),
            )
            .attribute(
                Attribute::software("trigger_source", Kind::Select(TRIGGER_SOURCES), "immediately")
                    .call_setup()
                    .doc("Use 'immediately' if no synchronisation is required"),
            )
            .attribute(
                Attribute::software(
                    "trigger_delay",
                    Kind::Float {
                        min: -10.0,
                        max: CYCLE * 2f64.powi(30),
                    },
                    0.0,
                )
                .call_setup()
                .doc("delay between trigger and the centre of the trace [s], ignored in 'immediately'"),
            )
            .attribute(
                Attribute::register("threshold", volts(14), Register::integer(0x8, 14))
                    .doc("trigger threshold [volts]"),
            )
            .attribute(
                Attribute::register("hysteresis", volts(14), Register::integer(0x20, 14))
                    .doc("hysteresis for the trigger [volts]"),
            )
            .attribute(
                Attribute::register(
                    "trigger_debounce",
                    Kind::Fixed(FixedPoint::unsigned(20, 125e6)),
                    Register::integer(0x90, 20),
                )
                .doc("trigger debounce time [s]"),
            )
            .attribute(
                Attribute::register(
                    "decimation",
                    Kind::Int {
                        min: 1,
                        max: MAX_DECIMATION,
                    },
                    Register::integer(0x14, 17),
                )
                .normalized_by(power_of_two)
                .part_of("duration")
                .call_setup(),
            )
            .attribute(Attribute::computed(
                "sampling_time",
                Kind::Float {
                    min: 0.0,
                    max: f64::MAX,
                },
                get_sampling_time,
                Some(set_sampling_time),
            ))
            .attribute(Attribute::computed(
                "duration",
                Kind::Float {
                    min: 0.0,
                    max: f64::MAX,
                },
                get_duration,
                Some(set_duration),
            ))
            .attribute(
                Attribute::register("average", Kind::Bool, Register::bit(0x28, 0))
                    .doc("average the samples dropped by the decimation"),
            )
            .attribute(
                Attribute::register("voltage_in1", volts(14), Register::integer(0x154, 14))
                    .read_only(),
            )
            .attribute(
                Attribute::register("voltage_in2", volts(14), Register::integer(0x158, 14))
                    .read_only(),
            )
            .attribute(
                Attribute::register(
                    "current_timestamp",
                    Kind::Int {
                        min: 0,
                        max: i64::MAX,
                    },
                    Register::integer(0x15C, 64),
                )
                .read_only()
                .doc("FPGA clock cycles since power-up"),
            )
            .attribute(
                Attribute::register(
                    "trigger_timestamp",
                    Kind::Int {
                        min: 0,
                        max: i64::MAX,
                    },
                    Register::integer(0x164, 64),
                )
                .read_only()
                .doc("value of current_timestamp at the last trigger"),
            )
            .attribute(
                Attribute::register("pretrig_ok", Kind::Bool, Register::bit(0x16C, 0))
                    .read_only()
                    .doc("enough samples were taken to fill the part before the trigger"),
            )
            .setup_attributes(&[
                "input1",
                "input2",
                "duration",
                "average",
                "trigger_source",
                "trigger_delay",
                "threshold",
                "hysteresis",
            ])
            .build()
    })
}

pub fn new_scope(name: &str, context: ModuleContext) -> Result<Module, StemlabError> {
    Ok(Module::new(
        name,
        SCOPE_BASE_ADDRESS,
        scope_class(),
        Arc::new(Scope {
            acquiring: AtomicBool::new(false),
        }),
        context,
    ))
}

fn acquiring(module: &Module) -> Result<bool, StemlabError> {
    let kind = module.kind();
    let scope = kind
        .as_any()
        .downcast_ref::<Scope>()
        .ok_or_else(|| StemlabError::Internal(format!("{} is not a scope", module.name())))?;
    Ok(scope.acquiring.load(Ordering::SeqCst))
}

/// True once the trace of the running acquisition is complete.
pub fn curve_ready(module: &mut Module) -> Result<bool, StemlabError> {
    Ok(acquiring(module)?
        && module.read_register(TRIGGER_ARMED)? == 0
        && module.read_register(TRIGGER_DELAY_RUNNING)? == 0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Curve {
    pub times: Vec<f64>,
    pub ch1: Vec<f64>,
    pub ch2: Vec<f64>,
}

/// Sample times [s] of a trace with the current settings.
pub fn times(module: &mut Module) -> Result<Vec<f64>, StemlabError> {
    let duration = module.get("duration")?.as_f64()?;
    let start = match module.get("trigger_source")?.as_str()? {
        "immediately" => 0.0,
        _ => module.get("trigger_delay")?.as_f64()? - duration / 2.0,
    };
    let step = duration / DATA_LENGTH as f64;
    Ok((0..DATA_LENGTH).map(|i| start + i as f64 * step).collect())
}

fn channel(module: &Module, offset: u32, first: usize) -> Result<Vec<f64>, StemlabError> {
    let mut samples: Vec<f64> = module
        .read_words(offset, DATA_LENGTH)?
        .into_iter()
        .map(|word| sign_extend(word as u64, 14) as f64 / 2f64.powi(13))
        .collect();
    samples.rotate_left(first);
    Ok(samples)
}

/// Read the last trace [volts], oldest sample first.
///
/// The sample memory is a ring buffer; the trace starts right after the sample the write
/// pointer reached at the trigger plus the trigger delay.
pub fn curve(module: &mut Module) -> Result<Curve, StemlabError> {
    let end = module.read_register(WRITE_POINTER_TRIGGER)? + module.read_register(TRIGGER_DELAY)?;
    let first = ((end + 1) % DATA_LENGTH as u64) as usize;
    Ok(Curve {
        times: times(module)?,
        ch1: channel(module, CH1_DATA, first)?,
        ch2: channel(module, CH2_DATA, first)?,
    })
}
