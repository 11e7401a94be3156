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

//! A StemLab board: one connection to its monitor server and the modules behind it.
//!
//! # Architecture
//!
//! The board owns a [`ConnectionFactory`] for its host. The first connection it hands out is
//! the master connection shared by all modules; further connections to other ports (slave
//! servers sharing the same FPGA) are created on demand with increasing client numbers.
//!
//! Modules are created eagerly from the configured class list through the module registry, see
//! [`crate::modules::instance_names`] for how they are named. Each restores its persisted
//! setup right away.
//!
//! With `simulate = true` the board starts an in-process [`MockMonitorServer`] with the
//! constants of the FPGA design preloaded, and connects to that instead.

use crate::client::{ConnectionFactory, FixedPort, MonitorClient, PortRotation, ReconnectService};
use crate::config::Config;
use crate::error::StemlabError;
use crate::hardware::dsp::{DSP_BASE_ADDRESS, DSP_STRIDE, dsp_base_address};
use crate::hardware::register_modules;
use crate::modules::{
    Module, ModuleContext, NotificationSink, StateStore, instance_names, module_entry,
};
use crate::simulator::MockMonitorServer;
use log::{error, info, warn};
use std::sync::Arc;

pub struct Board {
    factory: ConnectionFactory,
    client: Arc<MonitorClient>,
    modules: Vec<Module>,
    simulator: Option<MockMonitorServer>,
}

/// A simulator holding the constants a real bitfile reports.
fn start_simulator() -> Result<MockMonitorServer, StemlabError> {
    let server = MockMonitorServer::start()?;
    for number in 0..16 {
        let base = DSP_BASE_ADDRESS + number * DSP_STRIDE;
        // one input filter stage, 5 shift bits, 10 Hz minimum bandwidth
        server.set_register(base + 0x220, 1);
        server.set_register(base + 0x224, 5);
        server.set_register(base + 0x228, 10);
    }
    let iir = dsp_base_address("iir")?;
    server.set_register(iir + 0x200, 32);
    server.set_register(iir + 0x204, 29);
    server.set_register(iir + 0x208, 14);
    info!("Simulating the board on port {}", server.port());
    Ok(server)
}

impl Board {
    /// Connect to the configured board and create its modules.
    ///
    /// # Returns: `Result<Board, StemlabError>`
    /// * `Ok(Board)` - Connected board with all modules created
    /// * `Err(StemlabError::Connection)` - The master connection could not be established
    /// * `Err(StemlabError::UnknownModule)` - A configured class does not exist
    pub fn new(
        config: &Config,
        store: Arc<dyn StateStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Board, StemlabError> {
        register_modules();
        let simulator = match config.board.simulate {
            true => Some(start_simulator()?),
            false => None,
        };
        let (host, port) = match &simulator {
            Some(server) => ("127.0.0.1".to_string(), server.port()),
            None => (config.board.hostname.clone(), config.board.port),
        };
        let reconnect: Arc<dyn ReconnectService> = if config.board.reconnect_ports.is_empty() {
            Arc::new(FixedPort(port))
        } else {
            Arc::new(PortRotation::new(config.board.reconnect_ports.clone()))
        };
        let factory = ConnectionFactory::new(&host, config.board.timeout, Some(reconnect));
        let client = Arc::new(factory.connect(port)?);
        info!("Connected to the board at {host}:{port}");

        let context = ModuleContext {
            client: Some(client.clone()),
            store,
            sink,
            parent: Some(host),
            frequency_correction: config.board.frequency_correction,
        };
        let mut modules = Vec::new();
        for (class, name) in instance_names(&config.modules)? {
            let entry = module_entry(&class)?;
            let mut module = (entry.constructor)(&name, context.clone())?;
            if let Err(e) = module.load_setup_attributes() {
                warn!("Could not restore the setup of {name}: {e}");
            }
            modules.push(module);
        }
        Ok(Board {
            factory,
            client,
            modules,
            simulator,
        })
    }

    pub fn module(&self, name: &str) -> Result<&Module, StemlabError> {
        self.modules
            .iter()
            .find(|m| m.name() == name)
            .ok_or_else(|| StemlabError::UnknownModule(name.to_string()))
    }

    pub fn module_mut(&mut self, name: &str) -> Result<&mut Module, StemlabError> {
        self.modules
            .iter_mut()
            .find(|m| m.name() == name)
            .ok_or_else(|| StemlabError::UnknownModule(name.to_string()))
    }

    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(Module::name).collect()
    }

    /// The master connection.
    pub fn client(&self) -> &Arc<MonitorClient> {
        &self.client
    }

    /// An additional connection to another server port of the same board.
    pub fn slave_client(&self, port: u16) -> Result<MonitorClient, StemlabError> {
        self.factory.connect(port)
    }

    pub fn simulator(&self) -> Option<&MockMonitorServer> {
        self.simulator.as_ref()
    }

    pub fn read_registers(&self, address: u32, length: usize) -> Result<Vec<u32>, StemlabError> {
        self.client.read(address, length)
    }

    pub fn write_registers(&self, address: u32, values: &[u32]) -> Result<(), StemlabError> {
        self.client.write(address, values)
    }

    /// Clear every module, then close the master connection.
    ///
    /// All modules are cleared even if one fails; the first failure is returned.
    pub fn clear(&mut self) -> Result<(), StemlabError> {
        let mut first_error = None;
        for module in &mut self.modules {
            if let Err(e) = module.clear() {
                error!("Failed to clear {}: {e}", module.name());
                first_error.get_or_insert(e);
            }
        }
        self.modules.clear();
        self.client.close();
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Value;
    use crate::modules::{LogSink, MemoryStore, ModuleState};
    use googletest::prelude::*;

    fn simulated_config(modules: &[&str]) -> Config {
        let mut config = Config::default();
        config.board.simulate = true;
        config.modules = modules.iter().map(|m| m.to_string()).collect();
        config
    }

    fn board(modules: &[&str], store: Arc<MemoryStore>) -> Board {
        Board::new(&simulated_config(modules), store, Arc::new(LogSink))
            .expect("failed to create board")
    }

    #[gtest]
    fn creates_the_configured_modules() {
        let board = board(&["sampler", "pid", "pid", "iir"], Arc::new(MemoryStore::new()));
        assert_that!(board.module_names(), eq(&vec!["sampler", "pid0", "pid1", "iir"]));
        assert_that!(
            &board.module("pid7").map(|_| ()),
            err(displays_as(contains_substring("No module named 'pid7'")))
        );
    }

    #[gtest]
    fn unknown_classes_fail_the_board() {
        let result = Board::new(
            &simulated_config(&["lockin"]),
            Arc::new(MemoryStore::new()),
            Arc::new(LogSink),
        );
        assert_that!(
            &result.map(|_| ()),
            err(displays_as(contains_substring("StemlabError::UnknownModule")))
        );
    }

    #[gtest]
    fn restores_persisted_setups_on_creation() {
        let store = Arc::new(MemoryStore::new());
        let state = ModuleState::from([("setpoint".to_string(), Value::Float(0.25))]);
        store.save("pid1", &state).expect("failed to save");
        let mut board = board(&["pid", "pid"], store);
        let pid1 = board.module_mut("pid1").expect("no pid1");
        assert_that!(pid1.get("setpoint"), ok(eq(&Value::Float(0.25))));
    }

    #[gtest]
    fn slave_connections_are_numbered() {
        let board = board(&["pid"], Arc::new(MemoryStore::new()));
        let port = board.simulator().expect("not simulated").port();
        let slave = board.slave_client(port).expect("failed to connect slave");
        assert_that!(board.client().client_number(), eq(0));
        assert_that!(slave.client_number(), eq(1));
    }

    #[gtest]
    fn clear_closes_the_master_connection() {
        let mut board = board(&["pid"], Arc::new(MemoryStore::new()));
        board
            .write_registers(0x4030_0104, &[0x1000])
            .expect("failed to write");
        board.clear().expect("failed to clear");
        assert!(board.module_names().is_empty());
        let simulator = board.simulator().expect("not simulated");
        assert_that!(simulator.register(0x4030_0104), eq(0x1000));
        // the server notes the sentinel asynchronously
        for _ in 0..100 {
            if simulator.closes_received() == 1 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_that!(simulator.closes_received(), eq(1));
    }
}
