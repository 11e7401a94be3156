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

use crate::comm::dbus::{SharedBoard, to_json, validate_name, with_board};
use crate::hardware::{sampler, scope};
use log::info;
use std::time::Duration;
use zbus::{fdo, interface};

pub struct StatusInterface {
    pub board: SharedBoard,
}

#[interface(name = "com.canonical.stemlabd.status")]
impl StatusInterface {
    /// One module name per line.
    pub async fn list_modules(&self) -> Result<String, fdo::Error> {
        info!("list_modules called");
        Ok(with_board(&self.board, |board| Ok(board.module_names().join("\n"))).await?)
    }

    pub async fn list_attributes(&self, module: &str) -> Result<String, fdo::Error> {
        info!("list_attributes called with module: {module}");
        validate_name("module", module)?;
        let module = module.to_string();
        Ok(with_board(&self.board, move |board| {
            Ok(board.module(&module)?.attribute_names().join("\n"))
        })
        .await?)
    }

    /// The current value as JSON.
    pub async fn get_attribute(&self, module: &str, attribute: &str) -> Result<String, fdo::Error> {
        info!("get_attribute called with module: {module} and attribute: {attribute}");
        validate_name("module", module)?;
        validate_name("attribute", attribute)?;
        let (module, attribute) = (module.to_string(), attribute.to_string());
        Ok(with_board(&self.board, move |board| {
            let value = board.module_mut(&module)?.get(&attribute)?;
            to_json(&value)
        })
        .await?)
    }

    /// The owner of a module, empty if it is free.
    pub async fn get_owner(&self, module: &str) -> Result<String, fdo::Error> {
        info!("get_owner called with module: {module}");
        validate_name("module", module)?;
        let module = module.to_string();
        Ok(with_board(&self.board, move |board| {
            Ok(board.module(&module)?.owner().unwrap_or_default().to_string())
        })
        .await?)
    }

    /// The setup attributes of a module as a JSON object.
    pub async fn get_setup(&self, module: &str) -> Result<String, fdo::Error> {
        info!("get_setup called with module: {module}");
        validate_name("module", module)?;
        let module = module.to_string();
        Ok(with_board(&self.board, move |board| {
            let setup = board.module_mut(&module)?.setup_attributes()?;
            to_json(&setup)
        })
        .await?)
    }

    /// Mean, standard deviation, maximum and minimum of a DSP signal as a JSON object.
    pub async fn get_signal_stats(&self, signal: &str, duration_ms: u32) -> Result<String, fdo::Error> {
        info!("get_signal_stats called with signal: {signal} and duration_ms: {duration_ms}");
        validate_name("signal", signal)?;
        let signal = signal.to_string();
        Ok(with_board(&self.board, move |board| {
            let module = board.module_mut("sampler")?;
            let stats = sampler::stats(
                module,
                &signal,
                Duration::from_millis(duration_ms as u64),
            )?;
            to_json(&stats)
        })
        .await?)
    }

    /// True once the trace of the running acquisition of a scope is complete.
    pub async fn curve_ready(&self, module: &str) -> Result<bool, fdo::Error> {
        info!("curve_ready called with module: {module}");
        validate_name("module", module)?;
        let module = module.to_string();
        Ok(with_board(&self.board, move |board| {
            scope::curve_ready(board.module_mut(&module)?)
        })
        .await?)
    }

    /// The last trace of a scope as a JSON object of `times`, `ch1` and `ch2`.
    pub async fn get_curve(&self, module: &str) -> Result<String, fdo::Error> {
        info!("get_curve called with module: {module}");
        validate_name("module", module)?;
        let module = module.to_string();
        Ok(with_board(&self.board, move |board| {
            let curve = scope::curve(board.module_mut(&module)?)?;
            to_json(&curve)
        })
        .await?)
    }

    pub async fn read_registers(&self, address: u32, length: u32) -> Result<Vec<u32>, fdo::Error> {
        info!("read_registers called with address: 0x{address:08X} and length: {length}");
        Ok(with_board(&self.board, move |board| {
            board.read_registers(address, length as usize)
        })
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::dbus::tests::simulated_board;
    use googletest::prelude::*;

    #[tokio::test]
    pub async fn lists_modules_and_attributes() {
        let status = StatusInterface {
            board: simulated_board(),
        };
        let modules = status.list_modules().await.expect("list_modules failed");
        assert_that!(modules, eq("sampler\npid0\niir\nscope"));
        let attributes = status
            .list_attributes("pid0")
            .await
            .expect("list_attributes failed");
        assert_that!(attributes, contains_substring("setpoint"));
    }

    #[tokio::test]
    pub async fn values_are_json() {
        let status = StatusInterface {
            board: simulated_board(),
        };
        let input = status
            .get_attribute("pid0", "input")
            .await
            .expect("get_attribute failed");
        assert_that!(input, eq("\"pid0\""));
        let owner = status.get_owner("pid0").await.expect("get_owner failed");
        assert_that!(owner, eq(""));
    }

    #[tokio::test]
    pub async fn unknown_modules_are_invalid_arguments() {
        let status = StatusInterface {
            board: simulated_board(),
        };
        let result = status.get_setup("lockin").await;
        assert!(matches!(result, Err(fdo::Error::InvalidArgs(_))), "{result:?}");
    }

    #[tokio::test]
    pub async fn constant_signals_have_no_spread() {
        let status = StatusInterface {
            board: simulated_board(),
        };
        let stats = status
            .get_signal_stats("in1", 5)
            .await
            .expect("get_signal_stats failed");
        assert_that!(stats, contains_substring("\"stddev\":0.0"));
    }

    #[tokio::test]
    pub async fn scope_traces_are_json() {
        let status = StatusInterface {
            board: simulated_board(),
        };
        let ready = status.curve_ready("scope").await.expect("curve_ready failed");
        assert_that!(ready, eq(false));
        let curve = status.get_curve("scope").await.expect("get_curve failed");
        assert_that!(curve, starts_with("{\"times\":[0.0,"));
        assert_that!(curve, contains_substring("\"ch2\":[0.0,"));
    }

    #[tokio::test]
    pub async fn curves_need_a_scope() {
        let status = StatusInterface {
            board: simulated_board(),
        };
        let result = status.get_curve("pid0").await;
        assert!(result.is_err(), "{result:?}");
    }
}
