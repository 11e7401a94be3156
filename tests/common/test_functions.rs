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

use googletest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use stemlabd::board::Board;
use stemlabd::client::{FixedPort, MonitorClient};
use stemlabd::config::Config;
use stemlabd::error::StemlabError;
use stemlabd::modules::{LogSink, MemoryStore, NotificationSink};
use stemlabd::simulator::MockMonitorServer;

pub fn start_server() -> MockMonitorServer {
    MockMonitorServer::start().expect("failed to start simulator")
}

/// A client with a short timeout that reconnects to the same port.
pub fn connect(server: &MockMonitorServer) -> MonitorClient {
    MonitorClient::connect(
        "127.0.0.1",
        server.port(),
        0,
        Duration::from_millis(200),
        Some(Arc::new(FixedPort(server.port()))),
    )
    .expect("failed to connect to simulator")
}

pub fn simulated_board(modules: &[&str], store: Arc<MemoryStore>) -> Board {
    simulated_board_with_sink(modules, store, Arc::new(LogSink))
}

pub fn simulated_board_with_sink(
    modules: &[&str],
    store: Arc<MemoryStore>,
    sink: Arc<dyn NotificationSink>,
) -> Board {
    let mut config = Config::default();
    config.board.simulate = true;
    config.modules = modules.iter().map(|m| m.to_string()).collect();
    Board::new(&config, store, sink).expect("failed to create simulated board")
}

pub fn compare_error<T: std::fmt::Debug>(res: &Result<T, StemlabError>, expected: &str) {
    match res {
        Err(e) => assert_that!(
            e.to_string(),
            contains_substring(expected),
            "Mismatched error signature"
        ),
        Ok(value) => panic!("Result mismatch: got Ok({value:?}), expected an error with {expected}"),
    }
}
