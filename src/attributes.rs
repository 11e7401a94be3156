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

//! Named, typed attributes of hardware modules.
//!
//! An [`Attribute`] is a stateless descriptor shared by every module of a class. It knows how
//! to validate a raw value ([`Kind`]) and where the value lives ([`Storage`]): in the module's
//! own store, in a hardware register, or computed from other attributes. All reads and writes
//! go through the owning [`Module`], which provides the register bus, the store and the
//! notification side effects.

pub mod filter;
pub mod register;
pub mod value;

use crate::codec::{sign_extend, to_twos_complement};
use crate::error::StemlabError;
use crate::modules::Module;
pub use filter::FilterConstants;
use log::warn;
pub use register::{Register, RegisterBus, Semantics};
pub use value::Value;

pub type Getter = fn(&mut Module) -> Result<Value, StemlabError>;
pub type Setter = fn(&mut Module, Value) -> Result<(), StemlabError>;
/// Extra normalisation applied after the kind's own validation.
pub type Normalizer = fn(&mut Module, &'static str, Value) -> Result<Value, StemlabError>;

/// A fixed-point register seen as a real number: `register = round(value * norm)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedPoint {
    pub bits: u32,
    pub norm: f64,
    pub signed: bool,
    pub min: f64,
    pub max: f64,
    /// Gains must not silently round to zero.
    pub avoid_zero: bool,
}

impl FixedPoint {
    pub fn signed(bits: u32, norm: f64) -> FixedPoint {
        FixedPoint {
            bits,
            norm,
            signed: true,
            min: -((1u64 << (bits - 1)) as f64) / norm,
            max: ((1u64 << (bits - 1)) - 1) as f64 / norm,
            avoid_zero: false,
        }
    }

    pub fn unsigned(bits: u32, norm: f64) -> FixedPoint {
        FixedPoint {
            bits,
            norm,
            signed: false,
            min: 0.0,
            max: ((1u64 << bits) - 1) as f64 / norm,
            avoid_zero: false,
        }
    }

    pub fn gain(self) -> FixedPoint {
        FixedPoint {
            avoid_zero: true,
            ..self
        }
    }

    pub fn bounded(self, min: f64, max: f64) -> FixedPoint {
        FixedPoint { min, max, ..self }
    }

    /// The register granularity.
    pub fn increment(&self) -> f64 {
        1.0 / self.norm
    }

    fn round(&self, value: f64) -> f64 {
        let value = if self.signed { value } else { value.abs() };
        let increment = self.increment();
        ((value / increment).round() * increment).clamp(self.min, self.max)
    }

    /// Round to the register granularity and saturate to its range.
    pub fn normalize(&self, name: &str, value: f64) -> f64 {
        let mut rounded = self.round(value);
        if self.avoid_zero && rounded == 0.0 && value != 0.0 {
            rounded = self.round(self.increment().copysign(value));
            warn!(
                "Avoided rounding value {value:.1e} of the gain register {name} to zero. \
                Setting it to {rounded:.1e} instead."
            );
        }
        if self.avoid_zero && (value > self.max || value < self.min) {
            warn!(
                "Requested gain for {name} is outside the bounds allowed by the hardware. \
                Desired gain of {value:.1e} is capped to {rounded:.1e}."
            );
        }
        rounded
    }

    pub fn to_value(&self, raw: u64) -> f64 {
        if self.signed {
            sign_extend(raw, self.bits) as f64 / self.norm
        } else {
            raw as f64 / self.norm
        }
    }

    pub fn to_raw(&self, value: f64) -> u64 {
        let mut v = (value * self.norm).round() as i64;
        // small values must not vanish in the register
        if v == 0 && value > 0.0 {
            v = 1;
        } else if v == 0 && value < 0.0 {
            v = -1;
        }
        if self.signed {
            to_twos_complement(v, self.bits)
        } else {
            (v.unsigned_abs()).min((1u64 << self.bits) - 1)
        }
    }
}

/// What values an attribute accepts and how it normalises them.
#[derive(Debug, Clone, Copy)]
pub enum Kind {
    Bool,
    Int { min: i64, max: i64 },
    Float { min: f64, max: f64 },
    Fixed(FixedPoint),
    /// Named options and the register code each one stands for.
    Select(&'static [(&'static str, u32)]),
    Text,
    FloatList,
    ComplexList,
    Filter(FilterConstants),
}

/// Where the value of an attribute lives.
#[derive(Debug, Clone, Copy)]
pub enum Storage {
    Software,
    Register(Register),
    Computed {
        get: Getter,
        set: Option<Setter>,
    },
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: &'static str,
    pub doc: &'static str,
    pub kind: Kind,
    pub storage: Storage,
    pub default: Value,
    /// Setting this attribute re-derives the module setup.
    pub call_setup: bool,
    /// Observed values such as live samples. Never written.
    pub read_only: bool,
    pub normalizer: Option<Normalizer>,
    /// Changes of this attribute are also changes of the named aggregate attribute.
    pub master: Option<&'static str>,
}

impl Attribute {
    fn new(name: &'static str, kind: Kind, storage: Storage, default: Value) -> Attribute {
        Attribute {
            name,
            doc: "",
            kind,
            storage,
            default,
            call_setup: false,
            read_only: false,
            normalizer: None,
            master: None,
        }
    }

    pub fn register(name: &'static str, kind: Kind, register: Register) -> Attribute {
        let default = match kind {
            Kind::Bool => Value::Bool(false),
            Kind::Select(options) => Value::Text(options.first().map_or("", |o| o.0).into()),
            Kind::Filter(_) => Value::FloatList(vec![0.0]),
            Kind::Fixed(_) | Kind::Float { .. } => Value::Float(0.0),
            _ => Value::Int(0),
        };
        Attribute::new(name, kind, Storage::Register(register), default)
    }

    pub fn software(name: &'static str, kind: Kind, default: impl Into<Value>) -> Attribute {
        Attribute::new(name, kind, Storage::Software, default.into())
    }

    pub fn computed(name: &'static str, kind: Kind, get: Getter, set: Option<Setter>) -> Attribute {
        Attribute::new(
            name,
            kind,
            Storage::Computed { get, set },
            Value::Text(String::new()),
        )
    }

    pub fn doc(mut self, doc: &'static str) -> Attribute {
        self.doc = doc;
        self
    }

    pub fn call_setup(mut self) -> Attribute {
        self.call_setup = true;
        self
    }

    pub fn read_only(mut self) -> Attribute {
        self.read_only = true;
        self
    }

    pub fn normalized_by(mut self, normalizer: Normalizer) -> Attribute {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn part_of(mut self, master: &'static str) -> Attribute {
        self.master = Some(master);
        self
    }

    pub fn is_read_only(&self) -> bool {
        if self.read_only {
            return true;
        }
        match self.storage {
            Storage::Register(register) => register.semantics == Semantics::Constant,
            Storage::Computed { set, .. } => set.is_none(),
            Storage::Software => false,
        }
    }

    /// Coerce `raw` into the value this attribute would store.
    ///
    /// # Returns: `Result<Value, StemlabError>`
    /// * `Ok(Value)` - The clamped, rounded or otherwise corrected value
    /// * `Err(StemlabError::Argument)` - The value cannot be used for this attribute
    pub fn validate_and_normalize(
        &self,
        module: &mut Module,
        raw: &Value,
    ) -> Result<Value, StemlabError> {
        let value = match self.kind {
            Kind::Bool => Value::Bool(raw.as_bool()?),
            Kind::Int { min, max } => Value::Int(raw.as_i64()?.clamp(min, max)),
            Kind::Float { min, max } => {
                let v = raw.as_f64()?;
                if v.is_nan() {
                    return Err(StemlabError::Argument(format!(
                        "{} does not accept NaN",
                        self.name
                    )));
                }
                Value::Float(v.clamp(min, max))
            }
            Kind::Fixed(fixed) => {
                let v = raw.as_f64()?;
                if v.is_nan() {
                    return Err(StemlabError::Argument(format!(
                        "{} does not accept NaN",
                        self.name
                    )));
                }
                Value::Float(fixed.normalize(&format!("{}.{}", module.name(), self.name), v))
            }
            Kind::Select(options) => {
                let option = raw.as_str()?;
                if !options.iter().any(|(name, _)| *name == option) {
                    return Err(StemlabError::Argument(format!(
                        "'{option}' is not a valid option for {}. Options are {:?}",
                        self.name,
                        options.iter().map(|(name, _)| *name).collect::<Vec<_>>()
                    )));
                }
                Value::Text(option.to_string())
            }
            Kind::Text => Value::Text(raw.as_str()?.to_string()),
            Kind::FloatList => Value::FloatList(raw.to_float_list()?),
            Kind::ComplexList => Value::ComplexList(raw.to_complex_list()?),
            Kind::Filter(constants) => {
                Value::FloatList(constants.closest_valid(module, &raw.to_float_list()?)?)
            }
        };
        match self.normalizer {
            Some(normalizer) => normalizer(module, self.name, value),
            None => Ok(value),
        }
    }

    /// Current value, read from the hardware for register-backed attributes.
    pub fn get(&self, module: &mut Module) -> Result<Value, StemlabError> {
        match self.storage {
            Storage::Software => Ok(module
                .stored(self.name)
                .cloned()
                .unwrap_or_else(|| self.default.clone())),
            Storage::Register(register) => {
                let raw = module.read_register(register)?;
                self.from_raw(module, raw)
            }
            Storage::Computed { get, .. } => get(module),
        }
    }

    /// Store an already normalised value. No notification, no setup.
    pub fn set(&self, module: &mut Module, value: Value) -> Result<(), StemlabError> {
        match self.storage {
            Storage::Software => {
                module.store_value(self.name, value);
                Ok(())
            }
            Storage::Register(register) => {
                let raw = self.to_raw(module, &value)?;
                module.write_register(register, raw)
            }
            Storage::Computed { set: Some(set), .. } => set(module, value),
            Storage::Computed { set: None, .. } => Err(StemlabError::ReadOnly(format!(
                "attribute {}",
                self.name
            ))),
        }
    }

    fn from_raw(&self, module: &mut Module, raw: u64) -> Result<Value, StemlabError> {
        match self.kind {
            Kind::Bool => Ok(Value::Bool(raw != 0)),
            Kind::Int { .. } => Ok(Value::Int(raw as i64)),
            Kind::Fixed(fixed) => Ok(Value::Float(fixed.to_value(raw))),
            Kind::Select(options) => options
                .iter()
                .find(|(_, code)| *code as u64 == raw)
                .map(|(name, _)| Value::Text(name.to_string()))
                .ok_or_else(|| {
                    StemlabError::Internal(format!(
                        "register value {raw} of {} matches no option",
                        self.name
                    ))
                }),
            Kind::Filter(constants) => Ok(Value::FloatList(constants.bandwidths(module, raw)?)),
            _ => Err(StemlabError::Internal(format!(
                "{} cannot be stored in a register",
                self.name
            ))),
        }
    }

    fn to_raw(&self, module: &mut Module, value: &Value) -> Result<u64, StemlabError> {
        match self.kind {
            Kind::Bool => Ok(value.as_bool()? as u64),
            Kind::Int { .. } => Ok(value.as_i64()? as u64),
            Kind::Fixed(fixed) => Ok(fixed.to_raw(value.as_f64()?)),
            Kind::Select(options) => {
                let option = value.as_str()?;
                options
                    .iter()
                    .find(|(name, _)| *name == option)
                    .map(|(_, code)| *code as u64)
                    .ok_or_else(|| {
                        StemlabError::Argument(format!("'{option}' is not an option of {}", self.name))
                    })
            }
            Kind::Filter(constants) => constants.register_value(module, &value.to_float_list()?),
            _ => Err(StemlabError::Internal(format!(
                "{} cannot be stored in a register",
                self.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FixedPoint;
    use googletest::prelude::*;
    use rstest::*;

    #[gtest]
    #[rstest]
    #[case::rounds_to_increment(FixedPoint::signed(14, 8192.0), 0.50006, 0.5)]
    #[case::saturates_high(FixedPoint::signed(14, 8192.0), 3.0, 8191.0 / 8192.0)]
    #[case::saturates_low(FixedPoint::signed(14, 8192.0), -3.0, -1.0)]
    #[case::unsigned_takes_magnitude(FixedPoint::unsigned(14, 8192.0), -0.25, 0.25)]
    #[case::gain_avoids_zero(FixedPoint::signed(24, 4096.0).gain(), 1e-6, 1.0 / 4096.0)]
    #[case::gain_avoids_negative_zero(FixedPoint::signed(24, 4096.0).gain(), -1e-6, -1.0 / 4096.0)]
    #[case::plain_register_rounds_to_zero(FixedPoint::signed(24, 4096.0), 1e-6, 0.0)]
    fn normalizes(#[case] fixed: FixedPoint, #[case] requested: f64, #[case] expected: f64) {
        assert_that!(fixed.normalize("pid0.p", requested), eq(expected));
    }

    #[gtest]
    #[rstest]
    #[case::positive(0.5, 0x1000)]
    #[case::negative(-0.5, 0x3000)]
    #[case::minimum(-1.0, 0x2000)]
    #[case::tiny_positive(1e-9, 1)]
    #[case::tiny_negative(-1e-9, 0x3FFF)]
    fn encodes_signed_words(#[case] value: f64, #[case] raw: u64) {
        let fixed = FixedPoint::signed(14, 8192.0);
        assert_that!(fixed.to_raw(value), eq(raw));
    }

    #[gtest]
    fn decodes_what_it_encodes() {
        let fixed = FixedPoint::signed(16, 8192.0).bounded(-4.0, 4.0);
        for value in [-3.5, -0.125, 0.0, 1.0, 3.999] {
            let decoded = fixed.to_value(fixed.to_raw(fixed.normalize("pid0.ival", value)));
            assert!((decoded - value).abs() <= fixed.increment(), "{value} -> {decoded}");
        }
    }
}
