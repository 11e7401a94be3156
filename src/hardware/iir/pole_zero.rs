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

//! Poles and zeros of the IIR filter.
//!
//! The `poles` and `zeros` attributes are views over two stored lists each: the real elements
//! (`real_poles`) and the complex ones (`complex_poles`). Writing a view partitions the
//! elements by their imaginary part and writes both lists as one change. Reading it returns
//! the complex elements first, then the real ones.
//!
//! Stored elements are kept stable: a pole with a positive real part is mirrored into the left
//! half-plane, a zero real part becomes -1, and complex elements keep a non-negative
//! imaginary part. These corrections are logged and announced, never refused.
//!
//! At most one element of the four lists is selected at a time.

use crate::attributes::Value;
use crate::error::StemlabError;
use crate::modules::{Event, Module, Selection};
use log::{info, warn};
use num_complex::Complex64;

/// Stored lists in the order they are searched.
pub const CONTAINERS: [&str; 4] = ["real_poles", "real_zeros", "complex_poles", "complex_zeros"];

pub const DEFAULT_REAL_ELEMENT: f64 = -10000.0;
pub const DEFAULT_COMPLEX_ELEMENT: Complex64 = Complex64::new(-1000.0, 10000.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Poles,
    Zeros,
}

impl Family {
    pub fn name(self) -> &'static str {
        match self {
            Family::Poles => "poles",
            Family::Zeros => "zeros",
        }
    }

    fn singular(self) -> &'static str {
        match self {
            Family::Poles => "pole",
            Family::Zeros => "zero",
        }
    }

    pub fn real(self) -> &'static str {
        match self {
            Family::Poles => "real_poles",
            Family::Zeros => "real_zeros",
        }
    }

    pub fn complex(self) -> &'static str {
        match self {
            Family::Poles => "complex_poles",
            Family::Zeros => "complex_zeros",
        }
    }

    fn of(container: &str) -> Option<Family> {
        if container.ends_with("poles") {
            Some(Family::Poles)
        } else if container.ends_with("zeros") {
            Some(Family::Zeros)
        } else {
            None
        }
    }
}

fn is_complex(container: &str) -> bool {
    container.starts_with("complex")
}

fn container(name: &str) -> Result<&'static str, StemlabError> {
    CONTAINERS
        .iter()
        .copied()
        .find(|c| *c == name)
        .ok_or_else(|| {
            StemlabError::Argument(format!(
                "'{name}' is not one of the pole/zero lists {CONTAINERS:?}"
            ))
        })
}

pub fn normalize_real(family: Family, value: f64) -> f64 {
    let mut normalized = value;
    if normalized > 0.0 && family == Family::Poles {
        normalized = -normalized;
        warn!(
            "Real pole {value} has a positive real part. This will lead to unstable behavior. \
            The value was changed to {normalized}."
        );
    }
    if normalized == 0.0 {
        normalized = -1.0;
        warn!(
            "Real {} {value} has a real part of zero. This will lead to unstable behavior. \
            The value was changed to {normalized}.",
            family.singular()
        );
    }
    normalized
}

pub fn normalize_complex(family: Family, value: Complex64) -> Complex64 {
    let Complex64 { mut re, mut im } = value;
    if re > 0.0 && family == Family::Poles {
        re = -re;
        warn!(
            "Complex pole {value} has a positive real part. This will lead to unstable \
            behavior. The real part was changed to {re}."
        );
    }
    if re == 0.0 {
        re = -1.0;
        warn!(
            "Complex {} {value} has a real part of zero. This will lead to unstable behavior. \
            The real part was changed to {re}.",
            family.singular()
        );
    }
    if im < 0.0 {
        im = -im;
        info!(
            "Imaginary part of complex {} {value} was inverted for simplicity.",
            family.singular()
        );
    }
    Complex64::new(re, im)
}

/// Normaliser of the four stored lists.
pub(crate) fn normalize_list(
    module: &mut Module,
    attribute: &'static str,
    value: Value,
) -> Result<Value, StemlabError> {
    let family = Family::of(attribute).ok_or_else(|| {
        StemlabError::Internal(format!("{attribute} is not a pole or zero list"))
    })?;
    let normalized = match &value {
        Value::FloatList(list) => Value::FloatList(
            list.iter()
                .map(|v| normalize_real(family, *v))
                .collect(),
        ),
        Value::ComplexList(list) => Value::ComplexList(
            list.iter()
                .map(|v| normalize_complex(family, *v))
                .collect(),
        ),
        _ => value.clone(),
    };
    if normalized != value {
        module.report_correction(attribute, value, normalized.clone());
    }
    Ok(normalized)
}

/// Split elements into the real and the complex ones.
pub fn partition(elements: &[Complex64]) -> (Vec<f64>, Vec<Complex64>) {
    let (real, complex): (Vec<Complex64>, Vec<Complex64>) =
        elements.iter().partition(|element| element.im == 0.0);
    (real.iter().map(|element| element.re).collect(), complex)
}

/// Complex elements first, then the real ones.
pub fn merge(complex: &[Complex64], real: &[f64]) -> Vec<Complex64> {
    complex
        .iter()
        .copied()
        .chain(real.iter().map(|re| Complex64::new(*re, 0.0)))
        .collect()
}

pub fn get_master(module: &mut Module, family: Family) -> Result<Vec<Complex64>, StemlabError> {
    let complex = module.get(family.complex())?.to_complex_list()?;
    let real = module.get(family.real())?.to_float_list()?;
    Ok(merge(&complex, &real))
}

/// Replace all poles or all zeros.
///
/// Both lists are written under one setup guard, so whoever set the view derives the setup
/// once afterwards.
pub fn set_master(
    module: &mut Module,
    family: Family,
    elements: &[Complex64],
) -> Result<(), StemlabError> {
    let (real, complex) = partition(elements);
    {
        let mut guard = module.do_setup();
        guard.set(family.complex(), complex)?;
        guard.set(family.real(), real)?;
    }
    forget_stale_selection(module)
}

pub(crate) fn get_poles(module: &mut Module) -> Result<Value, StemlabError> {
    Ok(Value::ComplexList(get_master(module, Family::Poles)?))
}

pub(crate) fn set_poles(module: &mut Module, value: Value) -> Result<(), StemlabError> {
    set_master(module, Family::Poles, &value.to_complex_list()?)
}

pub(crate) fn get_zeros(module: &mut Module) -> Result<Value, StemlabError> {
    Ok(Value::ComplexList(get_master(module, Family::Zeros)?))
}

pub(crate) fn set_zeros(module: &mut Module, value: Value) -> Result<(), StemlabError> {
    set_master(module, Family::Zeros, &value.to_complex_list()?)
}

fn load(module: &mut Module, container: &'static str) -> Result<Vec<Complex64>, StemlabError> {
    module.get(container)?.to_complex_list()
}

fn store(
    module: &mut Module,
    container: &'static str,
    elements: Vec<Complex64>,
) -> Result<(), StemlabError> {
    if is_complex(container) {
        module.set(container, elements)
    } else {
        module.set(
            container,
            elements.iter().map(|e| e.re).collect::<Vec<f64>>(),
        )
    }
}

fn element_for(container: &'static str, value: Option<Complex64>) -> Result<Complex64, StemlabError> {
    match value {
        None if is_complex(container) => Ok(DEFAULT_COMPLEX_ELEMENT),
        None => Ok(Complex64::new(DEFAULT_REAL_ELEMENT, 0.0)),
        Some(value) if !is_complex(container) && value.im != 0.0 => Err(StemlabError::Argument(
            format!("{value} cannot be stored in {container}"),
        )),
        Some(value) => Ok(value),
    }
}

/// Insert an element, the list's default element if `value` is `None`, and select it.
///
/// # Returns: `Result<usize, StemlabError>`
/// * `Ok(usize)` - Index of the new element, `index` clamped to the list length
/// * `Err(StemlabError::Argument)` - Unknown list or complex value for a real list
pub fn insert(
    module: &mut Module,
    container_name: &str,
    index: usize,
    value: Option<Complex64>,
) -> Result<usize, StemlabError> {
    let container = container(container_name)?;
    let element = element_for(container, value)?;
    let mut elements = load(module, container)?;
    let index = index.min(elements.len());
    elements.insert(index, element);
    store(module, container, elements)?;
    select(module, container, index)?;
    Ok(index)
}

/// Replace an element and select it.
pub fn set_element(
    module: &mut Module,
    container_name: &str,
    index: usize,
    value: Complex64,
) -> Result<(), StemlabError> {
    let container = container(container_name)?;
    let element = element_for(container, Some(value))?;
    let mut elements = load(module, container)?;
    let slot = elements.get_mut(index).ok_or_else(|| {
        StemlabError::Argument(format!("{container} has no element {index}"))
    })?;
    *slot = element;
    store(module, container, elements)?;
    select(module, container, index)
}

pub fn remove(
    module: &mut Module,
    container_name: &str,
    index: usize,
) -> Result<Complex64, StemlabError> {
    let container = container(container_name)?;
    let mut elements = load(module, container)?;
    if index >= elements.len() {
        return Err(StemlabError::Argument(format!(
            "{container} has no element {index}"
        )));
    }
    let removed = elements.remove(index);
    store(module, container, elements)?;
    match module.selection() {
        Some(selection) if selection.attribute == container && selection.index == index => {
            clear_selection(module);
        }
        Some(selection) if selection.attribute == container && selection.index > index => {
            module.set_selection(Some(Selection {
                attribute: container,
                index: selection.index - 1,
            }));
        }
        _ => {}
    }
    Ok(removed)
}

/// Make `index` of `container` the only selected element of the module.
///
/// An index past the end of the list selects nothing.
pub fn select(module: &mut Module, container_name: &str, index: usize) -> Result<(), StemlabError> {
    let container = container(container_name)?;
    if index >= load(module, container)?.len() {
        warn!("{container} has no element {index}, nothing is selected");
        clear_selection(module);
        return Ok(());
    }
    if let Some(previous) = module.selection().filter(|s| s.attribute != container) {
        info!("{}.selected = None", previous.attribute);
    }
    module.set_selection(Some(Selection {
        attribute: container,
        index,
    }));
    module.notify(Event::PlotChanged {
        module: module.name().to_string(),
    });
    Ok(())
}

pub fn clear_selection(module: &mut Module) {
    module.set_selection(None);
    module.notify(Event::PlotChanged {
        module: module.name().to_string(),
    });
}

fn forget_stale_selection(module: &mut Module) -> Result<(), StemlabError> {
    if let Some(selection) = module.selection()
        && selection.index >= load(module, selection.attribute)?.len()
    {
        clear_selection(module);
    }
    Ok(())
}

/// Select the pole or zero closest to `value`.
///
/// Complex elements are compared by their imaginary part. With `logdist` the distance is the
/// ratio of the magnitudes, otherwise their difference.
pub fn select_closest(
    module: &mut Module,
    value: f64,
    logdist: bool,
) -> Result<Option<Selection>, StemlabError> {
    let mut best: Option<(f64, &'static str, usize)> = None;
    for container in CONTAINERS {
        for (index, element) in load(module, container)?.iter().enumerate() {
            let position = if is_complex(container) {
                element.im
            } else {
                element.re
            };
            let distance = if logdist {
                let ratio = (value / position).abs();
                if ratio < 1.0 { 1.0 / ratio } else { ratio }
            } else {
                (value.abs() - position.abs()).abs()
            };
            if best.is_none_or(|(closest, _, _)| distance < closest) {
                best = Some((distance, container, index));
            }
        }
    }
    match best {
        Some((_, container, index)) => select(module, container, index)?,
        None => clear_selection(module),
    }
    Ok(module.selection())
}
