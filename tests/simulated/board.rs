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

use crate::common::test_functions::{compare_error, simulated_board, simulated_board_with_sink};
use googletest::prelude::*;
use rstest::*;
use std::sync::Arc;
use std::sync::mpsc::channel;
use std::time::Duration;
use stemlabd::attributes::Value;
use stemlabd::hardware::sampler;
use stemlabd::modules::{ChannelSink, Event, MemoryStore, ModuleState, StateStore};

const PID0: u32 = 0x4030_0000;
const SCOPE: u32 = 0x4010_0000;

#[gtest]
fn attribute_writes_reach_the_registers() {
    let mut board = simulated_board(&["pid"], Arc::new(MemoryStore::new()));
    let pid = board.module_mut("pid0").expect("no pid0");
    pid.set("setpoint", 0.25).expect("failed to set setpoint");
    pid.set("input", "in2").expect("failed to set input");
    let simulator = board.simulator().expect("not simulated");
    assert_that!(simulator.register(PID0 + 0x104), eq(2048));
    assert_that!(board.read_registers(PID0 + 0x104, 1).expect("read failed"), eq(&vec![2048]));
}

#[gtest]
fn raw_register_writes_are_seen_by_the_modules() {
    let mut board = simulated_board(&["pid"], Arc::new(MemoryStore::new()));
    board
        .write_registers(PID0 + 0x104, &[0x3000])
        .expect("write failed");
    let pid = board.module_mut("pid0").expect("no pid0");
    // 14-bit two's complement
    assert_that!(pid.get("setpoint"), ok(eq(&Value::Float(-0.5))));
}

#[gtest]
fn ownership_keeps_the_free_setup() {
    let store = Arc::new(MemoryStore::new());
    let mut board = simulated_board(&["pid", "pid"], store.clone());
    let pid = board.module_mut("pid1").expect("no pid1");
    pid.set("p", 0.5).expect("failed to set p");
    pid.acquire("lockbox").expect("failed to acquire");
    pid.set("p", 4.0).expect("failed to set p");
    pid.set("setpoint", 0.125).expect("failed to set setpoint");
    let saved = store.load("pid1").expect("failed to load");
    assert_that!(saved.get("p"), eq(Some(&Value::Float(0.5))));
    assert_that!(saved.get("setpoint"), none());

    pid.release().expect("failed to release");
    assert_that!(pid.owner(), none());
    assert_that!(pid.get("p"), ok(eq(&Value::Float(0.5))));
}

#[gtest]
fn passing_ownership_on_does_not_persist() {
    let store = Arc::new(MemoryStore::new());
    let (sender, receiver) = channel();
    let mut board =
        simulated_board_with_sink(&["pid"], store.clone(), Arc::new(ChannelSink::new(sender)));
    let pid = board.module_mut("pid0").expect("no pid0");
    pid.acquire("scope").expect("failed to acquire");
    pid.acquire("lockbox").expect("failed to hand over");
    pid.set("i", 100.0).expect("failed to set i");
    assert_that!(store.load("pid0"), ok(eq(&ModuleState::new())));
    let owners: Vec<(Option<String>, Option<String>)> = receiver
        .try_iter()
        .filter_map(|event| match event {
            Event::OwnershipChanged { old, new, .. } => Some((old, new)),
            _ => None,
        })
        .collect();
    assert_that!(
        owners,
        eq(&vec![
            (None, Some("scope".to_string())),
            (Some("scope".to_string()), Some("lockbox".to_string())),
        ]),
    );
}

#[gtest]
fn setups_survive_a_new_board() {
    let store = Arc::new(MemoryStore::new());
    {
        let mut board = simulated_board(&["pid"], store.clone());
        let values = ModuleState::from([
            ("setpoint".to_string(), Value::Float(-0.25)),
            ("input".to_string(), Value::Text("in1".into())),
        ]);
        board
            .module_mut("pid0")
            .expect("no pid0")
            .setup(&values)
            .expect("setup failed");
        board.clear().expect("failed to clear");
    }
    let mut board = simulated_board(&["pid"], store);
    let pid = board.module_mut("pid0").expect("no pid0");
    assert_that!(pid.get("setpoint"), ok(eq(&Value::Float(-0.25))));
    assert_that!(pid.get("input"), ok(eq(&Value::Text("in1".into()))));
}

#[gtest]
#[rstest]
#[case::read_only("out1_saturated", Value::Bool(true), "StemlabError::ReadOnly")]
#[case::unknown("kp", Value::Float(1.0), "StemlabError::UnknownAttribute")]
#[case::bad_option("input", Value::Text("in7".into()), "StemlabError::Argument")]
fn rejected_writes_change_nothing(
    #[case] attribute: &str,
    #[case] value: Value,
    #[case] expected: &str,
) {
    let mut board = simulated_board(&["pid"], Arc::new(MemoryStore::new()));
    let pid = board.module_mut("pid0").expect("no pid0");
    let before = pid.setup_attributes().expect("failed to snapshot");
    compare_error(&pid.set(attribute, value), expected);
    assert_that!(pid.setup_attributes(), ok(eq(&before)));
}

#[gtest]
fn sampler_statistics_of_a_constant_signal() {
    let mut board = simulated_board(&["sampler", "pid"], Arc::new(MemoryStore::new()));
    let module = board.module_mut("sampler").expect("no sampler");
    let stats = sampler::stats(module, "pid0", Duration::from_millis(5)).expect("stats failed");
    assert_that!(stats.mean, eq(0.0));
    assert_that!(stats.stddev, eq(0.0));
    assert_that!(stats.max, eq(stats.min));
}

#[gtest]
fn scopes_stop_while_owned_and_rearm_on_release() {
    let mut board = simulated_board(&["scope"], Arc::new(MemoryStore::new()));
    let scope = board.module_mut("scope").expect("no scope");
    scope
        .set("trigger_source", "ch1_positive_edge")
        .expect("failed to set trigger_source");
    scope.acquire("lockbox").expect("failed to acquire");
    let simulator = board.simulator().expect("not simulated");
    assert_that!(simulator.register(SCOPE) & 0b1, eq(0));
    assert_that!(simulator.register(SCOPE + 0x4), eq(0));

    let scope = board.module_mut("scope").expect("no scope");
    scope.release().expect("failed to release");
    let simulator = board.simulator().expect("not simulated");
    assert_that!(simulator.register(SCOPE) & 0b1, eq(1));
    assert_that!(simulator.register(SCOPE + 0x4), eq(2));
}
