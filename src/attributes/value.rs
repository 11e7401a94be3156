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
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A dynamically typed attribute value.
///
/// Serialises to plain JSON (`true`, `3`, `0.5`, `"in1"`, `[1.0, 2.0]`, `[[-1.0, 2.0]]`) so that
/// the service surface can carry any attribute as a string. Coercion to the type an attribute
/// actually wants happens in its validation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    FloatList(Vec<f64>),
    ComplexList(Vec<Complex64>),
}

fn mismatch(value: &Value, wanted: &str) -> StemlabError {
    StemlabError::Argument(format!("{value} cannot be used as {wanted}"))
}

impl Value {
    pub fn as_f64(&self) -> Result<f64, StemlabError> {
        match self {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            Value::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            Value::FloatList(v) if v.len() == 1 => Ok(v[0]),
            _ => Err(mismatch(self, "a number")),
        }
    }

    pub fn as_i64(&self) -> Result<i64, StemlabError> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Bool(v) => Ok(*v as i64),
            _ => {
                let v = self.as_f64()?;
                if !v.is_finite() {
                    return Err(mismatch(self, "an integer"));
                }
                Ok(v.round() as i64)
            }
        }
    }

    pub fn as_bool(&self) -> Result<bool, StemlabError> {
        match self {
            Value::Bool(v) => Ok(*v),
            Value::Int(v) => Ok(*v != 0),
            Value::Float(v) => Ok(*v != 0.0),
            Value::Text(v) if v.eq_ignore_ascii_case("true") => Ok(true),
            Value::Text(v) if v.eq_ignore_ascii_case("false") => Ok(false),
            _ => Err(mismatch(self, "a boolean")),
        }
    }

    pub fn as_str(&self) -> Result<&str, StemlabError> {
        match self {
            Value::Text(v) => Ok(v),
            _ => Err(mismatch(self, "text")),
        }
    }

    /// Scalars become a list of one.
    pub fn to_float_list(&self) -> Result<Vec<f64>, StemlabError> {
        match self {
            Value::FloatList(v) => Ok(v.clone()),
            Value::ComplexList(v) => v
                .iter()
                .map(|c| {
                    if c.im == 0.0 {
                        Ok(c.re)
                    } else {
                        Err(mismatch(self, "a list of real numbers"))
                    }
                })
                .collect(),
            _ => Ok(vec![self.as_f64()?]),
        }
    }

    /// Real numbers become complex numbers with zero imaginary part.
    pub fn to_complex_list(&self) -> Result<Vec<Complex64>, StemlabError> {
        match self {
            Value::ComplexList(v) => Ok(v.clone()),
            Value::FloatList(v) => Ok(v.iter().map(|re| Complex64::new(*re, 0.0)).collect()),
            _ => Ok(vec![Complex64::new(self.as_f64()?, 0.0)]),
        }
    }

    /// Parse the JSON representation used on the service surface.
    pub fn from_json(json: &str) -> Result<Value, StemlabError> {
        serde_json::from_str(json)
            .map_err(|e| StemlabError::Argument(format!("'{json}' is not a valid value: {e}")))
    }

    pub fn to_json(&self) -> String {
        // serialising this enum cannot fail; NaN and infinities become null
        serde_json::to_string(self).unwrap_or_else(|_| "null".to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<Vec<f64>> for Value {
    fn from(value: Vec<f64>) -> Self {
        Value::FloatList(value)
    }
}

impl From<Vec<Complex64>> for Value {
    fn from(value: Vec<Complex64>) -> Self {
        Value::ComplexList(value)
    }
}
