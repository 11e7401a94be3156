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

use crate::common::test_functions::{simulated_board, simulated_board_with_sink};
use googletest::prelude::*;
use num_complex::Complex64;
use std::sync::Arc;
use std::sync::mpsc::channel;
use stemlabd::attributes::Value;
use stemlabd::hardware::iir::{self, pole_zero};
use stemlabd::modules::{ChannelSink, Event, MemoryStore, StateStore};

const IIR: u32 = 0x4034_0000;

fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

#[gtest]
fn pole_lists_follow_the_pole_view() {
    let store = Arc::new(MemoryStore::new());
    let (sender, receiver) = channel();
    let mut board =
        simulated_board_with_sink(&["iir"], store.clone(), Arc::new(ChannelSink::new(sender)));
    let module = board.module_mut("iir").expect("no iir");
    module
        .set("poles", vec![c(-2000.0, 0.0), c(-1000.0, 5000.0)])
        .expect("failed to set poles");

    assert_that!(
        module.get("complex_poles"),
        ok(eq(&Value::ComplexList(vec![c(-1000.0, 5000.0)])))
    );
    assert_that!(module.get("real_poles"), ok(eq(&Value::FloatList(vec![-2000.0]))));
    // complex poles come first in the view
    assert_that!(
        module.get("poles"),
        ok(eq(&Value::ComplexList(vec![c(-1000.0, 5000.0), c(-2000.0, 0.0)])))
    );
    let saved = store.load("iir").expect("failed to load");
    assert_that!(
        saved.get("poles"),
        eq(Some(&Value::ComplexList(vec![c(-1000.0, 5000.0), c(-2000.0, 0.0)]))),
    );
    // the filter is derived once for the whole list
    let plots = receiver
        .try_iter()
        .filter(|event| matches!(event, Event::PlotChanged { .. }))
        .count();
    assert_that!(plots, eq(1));
}

#[gtest]
fn element_edits_update_the_view_and_the_store() {
    let store = Arc::new(MemoryStore::new());
    let mut board = simulated_board(&["iir"], store.clone());
    let module = board.module_mut("iir").expect("no iir");
    let index = pole_zero::insert(module, "real_zeros", 5, None).expect("insert failed");
    assert_that!(index, eq(0));
    pole_zero::insert(module, "complex_zeros", 0, Some(c(-300.0, -4000.0)))
        .expect("insert failed");
    assert_that!(
        module.get("zeros"),
        ok(eq(&Value::ComplexList(vec![
            c(-300.0, 4000.0),
            c(pole_zero::DEFAULT_REAL_ELEMENT, 0.0)
        ])))
    );
    let selection = module.selection().expect("nothing selected");
    assert_that!((selection.attribute, selection.index), eq(("complex_zeros", 0)));

    pole_zero::remove(module, "complex_zeros", 0).expect("remove failed");
    assert_that!(module.selection(), none());
    let saved = store.load("iir").expect("failed to load");
    assert_that!(
        saved.get("zeros"),
        eq(Some(&Value::ComplexList(vec![c(pole_zero::DEFAULT_REAL_ELEMENT, 0.0)]))),
    );
}

#[gtest]
fn release_restores_the_filter() {
    let mut board = simulated_board(&["iir"], Arc::new(MemoryStore::new()));
    let module = board.module_mut("iir").expect("no iir");
    module
        .set("poles", vec![c(-5000.0, 0.0)])
        .expect("failed to set poles");
    module.acquire("lockbox").expect("failed to acquire");
    module
        .set("poles", vec![c(-1.0, 2.0), c(-3.0, 4.0)])
        .expect("failed to set poles");
    module.release().expect("failed to release");
    assert_that!(
        module.get("poles"),
        ok(eq(&Value::ComplexList(vec![c(-5000.0, 0.0)])))
    );
    assert_that!(module.get("complex_poles"), ok(eq(&Value::ComplexList(vec![]))));
}

#[gtest]
fn setup_programs_the_coefficient_memory() {
    let mut board = simulated_board(&["iir"], Arc::new(MemoryStore::new()));
    let module = board.module_mut("iir").expect("no iir");
    module.set("gain", 2.0).expect("failed to set gain");
    assert_that!(module.get("on"), ok(eq(&Value::Bool(true))));
    assert_that!(module.get("loops"), ok(eq(&Value::Int(iir::MIN_LOOPS))));
    let programmed = iir::coefficients(module)
        .expect("failed to read back")
        .expect("nothing programmed");
    assert_that!(programmed[0], eq([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]));
    let simulator = board.simulator().expect("not simulated");
    // b0 = 1.0 with 29 fractional bits
    assert_that!(simulator.register(IIR + 0x8000), eq(0x2000_0000));
    assert_that!(simulator.register(IIR + 0x8004), eq(0));
}
