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

//! The IIR filter: a cascade of biquads programmed from poles, zeros and a gain.
//!
//! # Architecture
//!
//! The module holds no coefficients of its own. Whenever `poles`, `zeros`, `gain` or `loops`
//! change, the setup is derived again:
//! 1. the filter is switched off
//! 2. a [`FilterDesigner`] turns the poles and zeros into biquad coefficients
//! 3. the coefficients are written to the coefficient memory in one transaction
//! 4. the filter is switched back on and the programmed coefficients are compared with the
//!    requested ones
//!
//! The hardware time-multiplexes one biquad `loops` times per sample, so `loops` trades
//! sampling rate for filter order.

pub mod pole_zero;

use crate::attributes::{Attribute, Kind, Register, RegisterBus, Value};
use crate::codec::{decode, encode};
use crate::error::StemlabError;
use crate::hardware::dsp::{dsp_base_address, filter_class};
use crate::modules::{Event, Module, ModuleClass, ModuleContext, ModuleKind};
use log::{debug, info, warn};
use num_complex::Complex64;
use pole_zero::{Family, get_master};
use std::any::Any;
use std::sync::{Arc, Mutex, OnceLock};

const CYCLE: f64 = 8e-9;
/// Cycles from the input to the output of the module.
pub const MODULE_DELAY: u32 = 5;
pub const MIN_LOOPS: i64 = 5;
pub const MAX_LOOPS: i64 = 1023;

const IIR_BITS: u32 = 0x200;
const IIR_SHIFT: u32 = 0x204;
const IIR_STAGES: u32 = 0x208;
const COEFFICIENTS: u32 = 0x8000;
const WORDS_PER_STAGE: usize = 8;

/// One row per biquad: `[b0, b1, b2, a0, a1, a2]`.
pub type Coefficients = Vec<[f64; 6]>;

/// What a [`FilterDesigner`] is asked to implement.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterRequest {
    pub zeros: Vec<Complex64>,
    pub poles: Vec<Complex64>,
    pub gain: f64,
    /// Loops currently configured, a hint for the designer.
    pub loops: i64,
    /// Duration of one loop [s].
    pub sampling_period: f64,
    pub min_loops: i64,
    pub max_loops: i64,
    pub stages: usize,
    pub total_bits: u32,
    pub shift_bits: u32,
    pub module_delay: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterDesign {
    pub loops: i64,
    pub coefficients: Coefficients,
}

/// Turns poles and zeros into biquad coefficients.
pub trait FilterDesigner: Send + Sync {
    fn design(&self, request: &FilterRequest) -> Result<FilterDesign, StemlabError>;
}

/// Programs a filter that passes its input through unchanged.
pub struct UnityDesigner;

impl FilterDesigner for UnityDesigner {
    fn design(&self, request: &FilterRequest) -> Result<FilterDesign, StemlabError> {
        if !request.poles.is_empty() || !request.zeros.is_empty() {
            info!(
                "No filter designer available for {} poles and {} zeros, programming a unity filter",
                request.poles.len(),
                request.zeros.len()
            );
        }
        Ok(FilterDesign {
            loops: request.loops.clamp(request.min_loops, request.max_loops),
            coefficients: vec![[1.0, 0.0, 0.0, 1.0, 0.0, 0.0]],
        })
    }
}

struct Limits {
    stages: usize,
    bits: u32,
    shift: u32,
}

pub struct Iir {
    designer: Arc<dyn FilterDesigner>,
    /// Coefficient memory as last written, the hardware cannot read it back.
    written: Mutex<Option<Vec<u32>>>,
}

impl Iir {
    pub fn new(designer: Arc<dyn FilterDesigner>) -> Iir {
        Iir {
            designer,
            written: Mutex::new(None),
        }
    }

    fn limits(module: &mut Module) -> Result<Limits, StemlabError> {
        let stages = module.read_register(Register::constant(IIR_STAGES))? as usize;
        let bits = module.read_register(Register::constant(IIR_BITS))? as u32;
        let shift = module.read_register(Register::constant(IIR_SHIFT))? as u32;
        if !(1..=64).contains(&bits) || shift > 64 {
            return Err(StemlabError::Internal(format!(
                "{} reports coefficients of {bits} bits with {shift} fractional bits",
                module.name()
            )));
        }
        Ok(Limits {
            stages,
            bits,
            shift,
        })
    }

    /// Write the coefficient memory. Stages beyond `coefficients` are zeroed.
    ///
    /// # Returns: `Result<(), StemlabError>`
    /// * `Ok(())` - All stages written in a single transaction
    /// * `Err(StemlabError::Capacity)` - More rows than the hardware has stages, nothing written
    fn program(&self, module: &mut Module, coefficients: &[[f64; 6]]) -> Result<(), StemlabError> {
        let limits = Self::limits(module)?;
        if coefficients.len() > limits.stages {
            return Err(StemlabError::Capacity(format!(
                "{} needs {} biquads but the hardware implements only {}",
                module.name(),
                coefficients.len(),
                limits.stages
            )));
        }
        let mut words = vec![0u32; limits.stages * WORDS_PER_STAGE];
        for (i, row) in coefficients.iter().enumerate() {
            if row[2] != 0.0 {
                warn!("Attention: b_2 ({i}) is not zero but {}", row[2]);
            }
            if row[3] != 1.0 {
                warn!("Attention: a_0 ({i}) is not one but {}", row[3]);
            }
            // b0, b1, -a1, -a2
            for (slot, column) in [(0, 0), (1, 1), (2, 4), (3, 5)] {
                let value = if column > 3 { -row[column] } else { row[column] };
                let (high, low) = encode(value, limits.bits, limits.shift);
                words[i * WORDS_PER_STAGE + 2 * slot] = low;
                words[i * WORDS_PER_STAGE + 2 * slot + 1] = high;
            }
        }
        module.write_words(COEFFICIENTS, &words)?;
        *self
            .written
            .lock()
            .map_err(|_| StemlabError::Internal(String::from("coefficient cache poisoned")))? =
            Some(words);
        Ok(())
    }

    fn read_back(&self, module: &mut Module) -> Result<Option<Coefficients>, StemlabError> {
        let limits = Self::limits(module)?;
        let loops = module.get("loops")?.as_i64()?.max(0) as usize;
        let written = self
            .written
            .lock()
            .map_err(|_| StemlabError::Internal(String::from("coefficient cache poisoned")))?
            .clone();
        let Some(words) = written else {
            return Ok(None);
        };
        let word = |stage: usize, slot: usize| {
            let at = stage * WORDS_PER_STAGE + 2 * slot;
            decode(words[at + 1], words[at], limits.bits, limits.shift)
        };
        Ok(Some(
            (0..loops.min(limits.stages))
                .map(|i| [word(i, 0), word(i, 1), 0.0, 1.0, -word(i, 2), -word(i, 3)])
                .collect(),
        ))
    }

    fn request(module: &mut Module, limits: &Limits) -> Result<FilterRequest, StemlabError> {
        Ok(FilterRequest {
            zeros: get_master(module, Family::Zeros)?,
            poles: get_master(module, Family::Poles)?,
            gain: module.get("gain")?.as_f64()?,
            loops: module.get("loops")?.as_i64()?,
            sampling_period: CYCLE * module.frequency_correction(),
            min_loops: MIN_LOOPS,
            max_loops: MAX_LOOPS,
            stages: limits.stages,
            total_bits: limits.bits,
            shift_bits: limits.shift,
            module_delay: MODULE_DELAY,
        })
    }
}

impl ModuleKind for Iir {
    fn setup(&self, module: &mut Module) -> Result<(), StemlabError> {
        let limits = Self::limits(module)?;
        if limits.stages == 0 {
            return Err(StemlabError::Setup {
                module: module.name().to_string(),
                reason: String::from("the FPGA bitfile has no IIR filter"),
            });
        }
        module.set("on", false)?;
        let request = Self::request(module, &limits)?;
        let design = self.designer.design(&request)?;
        module.set("loops", design.loops)?;
        self.program(module, &design.coefficients)?;
        debug!(
            "Filter sampling frequency is {:.3} MHz",
            1e-6 / sampling_period(module)?
        );
        module.set("on", true)?;

        if let Some(programmed) = self.read_back(module)? {
            log_deviation(module.name(), &design.coefficients, &programmed);
        }
        let overflow = module.get("overflow_bitfield")?.as_i64()?;
        if overflow != 0 {
            warn!(
                "IIR overflow detected on {}. Pattern: {overflow:#b}",
                module.name()
            );
        } else {
            debug!("IIR overflow pattern of {}: {overflow:#b}", module.name());
        }
        module.notify(Event::PlotChanged {
            module: module.name().to_string(),
        });
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn log_deviation(name: &str, designed: &[[f64; 6]], programmed: &[[f64; 6]]) {
    let mut max_deviation = 0.0f64;
    let mut reference = 0.0f64;
    for (want, got) in designed.iter().zip(programmed) {
        for (w, g) in want.iter().zip(got) {
            let deviation = (w - g).abs();
            if deviation > max_deviation {
                max_deviation = deviation;
                reference = w.abs();
            }
        }
    }
    let relative = if reference == 0.0 {
        0.0
    } else {
        max_deviation / reference
    };
    if relative > 0.05 {
        warn!(
            "Maximum deviation of the programmed coefficients of {name}: {max_deviation:.1e} \
            (relative: {relative:.1e})"
        );
    } else {
        debug!(
            "Maximum deviation of the programmed coefficients of {name}: {max_deviation:.1e} \
            (relative: {relative:.1e})"
        );
    }
}

fn with_iir<T>(
    module: &mut Module,
    f: impl FnOnce(&Iir, &mut Module) -> Result<T, StemlabError>,
) -> Result<T, StemlabError> {
    let kind = module.kind();
    let iir = kind
        .as_any()
        .downcast_ref::<Iir>()
        .ok_or_else(|| StemlabError::Internal(format!("{} is not an IIR filter", module.name())))?;
    f(iir, module)
}

/// Program biquad coefficients directly, bypassing the designer.
pub fn set_coefficients(
    module: &mut Module,
    coefficients: &[[f64; 6]],
) -> Result<(), StemlabError> {
    with_iir(module, |iir, module| iir.program(module, coefficients))
}

/// The coefficients of the first `loops` stages as programmed, `None` before the first write.
pub fn coefficients(module: &mut Module) -> Result<Option<Coefficients>, StemlabError> {
    with_iir(module, |iir, module| iir.read_back(module))
}

/// A single pass-through stage.
pub fn setup_unity(module: &mut Module) -> Result<(), StemlabError> {
    set_coefficients(module, &[[1.0, 0.0, 0.0, 1.0, 0.0, 0.0]])?;
    module.set("loops", 1i64)
}

/// Every stage outputs zero.
pub fn setup_zero(module: &mut Module) -> Result<(), StemlabError> {
    set_coefficients(module, &[[0.0, 0.0, 0.0, 1.0, 0.0, 0.0]])
}

/// Duration of one filter loop [s].
pub fn sampling_period(module: &mut Module) -> Result<f64, StemlabError> {
    let loops = module.get("loops")?.as_i64()?;
    Ok(CYCLE / module.frequency_correction() * loops as f64)
}

/// Human-readable summary of the overflow register.
pub fn overflow_text(bitfield: i64) -> String {
    if bitfield == 0 {
        String::from("no overflow")
    } else if bitfield & 0b111_1111 != 0 {
        String::from("sum and internal saturation")
    } else if bitfield & 0b100_0000 != 0 {
        String::from("sum saturation")
    } else if bitfield & 0b11_1111 != 0 {
        String::from("internal saturation")
    } else {
        format!("unknown overflow {bitfield:#b}")
    }
}

fn overflow(module: &mut Module) -> Result<Value, StemlabError> {
    let bitfield = module.get("overflow_bitfield")?.as_i64()?;
    Ok(Value::Text(overflow_text(bitfield)))
}

fn output_saturation(module: &mut Module) -> Result<Value, StemlabError> {
    let bitfield = module.get("overflow_bitfield")?.as_i64()?;
    Ok(Value::Bool(bitfield & 0b100_0000 != 0))
}

fn internal_overflow(module: &mut Module) -> Result<Value, StemlabError> {
    let bitfield = module.get("overflow_bitfield")?.as_i64()?;
    let overflow = bitfield & 0b11_1111 != 0;
    if overflow {
        info!("Internal overflow of {} in stages {bitfield:#08b}", module.name());
    }
    Ok(Value::Bool(overflow))
}

fn sampling_time(module: &mut Module) -> Result<Value, StemlabError> {
    Ok(Value::Float(sampling_period(module)?))
}

fn real_list(name: &'static str, master: &'static str) -> Attribute {
    Attribute::software(name, Kind::FloatList, Vec::<f64>::new())
        .normalized_by(pole_zero::normalize_list)
        .part_of(master)
}

fn complex_list(name: &'static str, master: &'static str) -> Attribute {
    Attribute::software(name, Kind::ComplexList, Vec::<Complex64>::new())
        .normalized_by(pole_zero::normalize_list)
        .part_of(master)
}

pub fn iir_class() -> &'static ModuleClass {
    static CLASS: OnceLock<ModuleClass> = OnceLock::new();
    CLASS.get_or_init(|| {
        ModuleClass::builder("iir")
            .extends(filter_class())
            .attribute(
                Attribute::register(
                    "loops",
                    Kind::Int {
                        min: MIN_LOOPS,
                        max: MAX_LOOPS,
                    },
                    Register::integer(0x100, 32),
                )
                .call_setup()
                .doc("Decimation factor of the IIR w.r.t. 125 MHz. Must be at least 5."),
            )
            .attribute(
                Attribute::register("on", Kind::Bool, Register::bit(0x104, 0))
                    .doc("IIR is on"),
            )
            .attribute(
                Attribute::register("bypass", Kind::Bool, Register::bit(0x104, 1))
                    .doc("IIR is bypassed"),
            )
            .attribute(complex_list("complex_poles", "poles"))
            .attribute(real_list("real_poles", "poles"))
            .attribute(complex_list("complex_zeros", "zeros"))
            .attribute(real_list("real_zeros", "zeros"))
            .attribute(
                Attribute::computed(
                    "poles",
                    Kind::ComplexList,
                    pole_zero::get_poles,
                    Some(pole_zero::set_poles),
                )
                .call_setup()
                .doc("Poles of the filter [Hz], complex ones first"),
            )
            .attribute(
                Attribute::computed(
                    "zeros",
                    Kind::ComplexList,
                    pole_zero::get_zeros,
                    Some(pole_zero::set_zeros),
                )
                .call_setup()
                .doc("Zeros of the filter [Hz], complex ones first"),
            )
            .attribute(
                Attribute::software("gain", Kind::Float { min: -1e20, max: 1e20 }, 1.0)
                    .call_setup(),
            )
            .attribute(
                Attribute::register(
                    "overflow_bitfield",
                    Kind::Int {
                        min: 0,
                        max: u32::MAX as i64,
                    },
                    Register::integer(0x108, 32),
                )
                .read_only()
                .doc("Bitmask for various overflow conditions"),
            )
            .attribute(Attribute::computed("overflow", Kind::Text, overflow, None))
            .attribute(Attribute::computed(
                "output_saturation",
                Kind::Bool,
                output_saturation,
                None,
            ))
            .attribute(Attribute::computed(
                "internal_overflow",
                Kind::Bool,
                internal_overflow,
                None,
            ))
            .attribute(Attribute::computed(
                "sampling_time",
                Kind::Float { min: 0.0, max: 1.0 },
                sampling_time,
                None,
            ))
            .setup_attributes(&[
                "input",
                "loops",
                "zeros",
                "poles",
                "output_direct",
                "inputfilter",
                "gain",
                "on",
                "bypass",
            ])
            .build()
    })
}

/// An IIR filter that programs a unity filter until a designer is supplied.
pub fn new_iir(name: &str, context: ModuleContext) -> Result<Module, StemlabError> {
    new_iir_with(name, context, Arc::new(UnityDesigner))
}

pub fn new_iir_with(
    name: &str,
    context: ModuleContext,
    designer: Arc<dyn FilterDesigner>,
) -> Result<Module, StemlabError> {
    Ok(Module::new(
        name,
        dsp_base_address("iir")?,
        iir_class(),
        Arc::new(Iir::new(designer)),
        context,
    ))
}
