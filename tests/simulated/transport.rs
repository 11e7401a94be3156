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

use crate::common::test_functions::{compare_error, connect, start_server};
use googletest::prelude::*;
use rstest::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use stemlabd::client::{MAX_ATTEMPTS, MonitorClient, PortRotation};

#[gtest]
#[rstest]
#[case::whole_frames(0)]
#[case::three_bytes(3)]
#[case::single_bytes(1)]
fn segmented_responses_are_reassembled(#[case] chunk_size: usize) {
    let server = start_server();
    server.answer_in_chunks(chunk_size);
    let client = connect(&server);
    let words: Vec<u32> = (1..=16).map(|n| n * 0x0101_0101).collect();
    client.write(0x100, &words).expect("write failed");
    assert_that!(client.read(0x100, 16).expect("read failed"), eq(&words));
    assert_that!(server.register(0x13C), eq(16 * 0x0101_0101));
}

#[gtest]
fn four_words_read_back_as_written() {
    let server = start_server();
    let client = connect(&server);
    client
        .write(0x100, &[0x1, 0x2000, 0xFFFF_FFFF, 0x8000_0000])
        .expect("write failed");
    assert_that!(
        client.read(0x100, 4).expect("read failed"),
        eq(&vec![0x1, 0x2000, 0xFFFF_FFFF, 0x8000_0000]),
    );
    assert_that!((client.reads(), client.writes()), eq((1, 1)));
}

#[gtest]
fn words_never_written_read_as_zero() {
    let server = start_server();
    let client = connect(&server);
    client.write(0x104, &[0xDEAD_BEEF]).expect("write failed");
    assert_that!(client.read(0x100, 3).expect("read failed"), eq(&vec![0, 0xDEAD_BEEF, 0]));
}

#[gtest]
fn desync_is_recovered_on_the_same_socket() {
    let server = start_server();
    server.set_register(0x200, 42);
    let client = connect(&server);
    server.corrupt_next_echoes(2);
    assert_that!(client.read(0x200, 1).expect("read failed"), eq(&vec![42]));
    assert_that!(server.headers_received(), eq(3));
    assert_that!(server.connections(), eq(1));
    // the drained payload of the bad attempts must not leak into later transactions
    assert_that!(client.read(0x200, 1).expect("read failed"), eq(&vec![42]));
}

#[gtest]
fn persistent_desync_exhausts_the_attempts() {
    let server = start_server();
    let client = connect(&server);
    server.corrupt_next_echoes(MAX_ATTEMPTS);
    let res = client.write(0x300, &[1, 2]);
    compare_error(&res, "StemlabError::Unavailable");
    compare_error(&res, "0x00000300 failed after 5 attempts");
    assert_that!(server.headers_received(), eq(MAX_ATTEMPTS));
    // the next transaction starts a fresh budget
    client.write(0x300, &[1, 2]).expect("write failed");
    assert_that!(server.register(0x304), eq(2));
}

#[gtest]
fn dropped_connections_are_reopened() {
    let server = start_server();
    let client = connect(&server);
    server.drop_next_connections(1);
    client.write(0x400, &[7]).expect("write failed");
    assert_that!(server.register(0x400), eq(7));
    assert_that!(server.connections(), eq(2));
    assert_that!(client.writes(), eq(1));
}

#[gtest]
fn dropped_connections_exhaust_the_attempts() {
    let server = start_server();
    let client = connect(&server);
    server.drop_next_connections(MAX_ATTEMPTS + 1);
    let res = client.write(0x600, &[3]);
    compare_error(&res, "StemlabError::Unavailable");
    compare_error(&res, "0x00000600 failed after 5 attempts");
    // no sixth attempt
    assert_that!(server.headers_received(), eq(MAX_ATTEMPTS));
    assert_that!(server.register(0x600), eq(0));
}

#[gtest]
fn interrupted_connections_are_reopened() {
    let server = start_server();
    server.set_register(0x700, 5);
    let client = connect(&server);
    client.interrupt();
    assert_that!(client.read(0x700, 1).expect("read failed"), eq(&vec![5]));
    assert_that!(server.connections(), eq(2));
}

#[gtest]
fn interrupted_reads_are_retried() {
    let server = start_server();
    let client = Arc::new(connect(&server));
    let words: Vec<u32> = (0..2000).collect();
    client.write(0x1000, &words).expect("write failed");
    // about 125 ms on the wire
    server.answer_in_chunks(64);
    let length = words.len();
    let reader = {
        let client = client.clone();
        thread::spawn(move || client.read(0x1000, length))
    };
    thread::sleep(Duration::from_millis(20));
    client.interrupt();
    let read = reader.join().expect("reader panicked");
    assert_that!(read, ok(eq(&words)));
    assert_that!(server.connections(), eq(2));
}

#[gtest]
fn reconnects_follow_the_port_rotation() {
    let first = start_server();
    let second = start_server();
    let client = MonitorClient::connect(
        "127.0.0.1",
        first.port(),
        3,
        Duration::from_millis(200),
        Some(Arc::new(PortRotation::new(vec![second.port()]))),
    )
    .expect("failed to connect");
    first.drop_next_connections(1);
    client.write(0x500, &[9]).expect("write failed");
    assert_that!(second.register(0x500), eq(9));
    assert_that!(first.register(0x500), eq(0));
    assert_that!(client.port().expect("no port"), eq(second.port()));
}

#[gtest]
fn closing_sends_the_sentinel_once() {
    let server = start_server();
    let client = connect(&server);
    client.close();
    client.close();
    drop(client);
    for _ in 0..100 {
        if server.closes_received() == 1 {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_that!(server.closes_received(), eq(1));
}
