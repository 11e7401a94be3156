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

//! Daemon configuration.
//!
//! The configuration is read from two TOML files: the user config at [`USER_CONFIG_PATH`]
//! overrides the vendor config at [`VENDOR_CONFIG_PATH`], which overrides the hardcoded
//! defaults below. A missing or malformed file is logged and otherwise ignored, so the daemon
//! always starts.
//!
//! ```toml
//! [board]
//! hostname = "192.168.1.100"
//! port = 2222
//! frequency_correction = 1.0
//! timeout_ms = 1000
//! reconnect_ports = [2223, 2224]
//! simulate = false
//!
//! [modules]
//! names = ["sampler", "pid", "pid", "pid", "iir"]
//! ```

pub mod config_files;

use config_files::{TomlConfig, config_from_file};
use log::{trace, warn};
use std::path::Path;
use std::time::Duration;

pub static USER_CONFIG_PATH: &str = "/etc/stemlabd/config.toml";
pub static VENDOR_CONFIG_PATH: &str = "/usr/lib/stemlabd/config.toml";

pub static DEFAULT_HOSTNAME: &str = "192.168.1.100";
pub const DEFAULT_PORT: u16 = 2222;
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
pub static DEFAULT_MODULES: &[&str] = &["sampler", "pid", "pid", "pid", "iir"];

/// Where the board is and how to talk to it.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardConfig {
    pub hostname: String,
    pub port: u16,
    /// Actual FPGA clock over its nominal 125 MHz.
    pub frequency_correction: f64,
    pub timeout: Duration,
    /// Ports handed out in turn when a connection has to be re-established. Empty means the
    /// same port again.
    pub reconnect_ports: Vec<u16>,
    /// Serve the board from an in-process simulator instead of the network.
    pub simulate: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub board: BoardConfig,
    /// Class names of the modules to instantiate, in order.
    pub modules: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        TomlConfig::default().into()
    }
}

fn load_or_default(path: &Path, which: &str) -> TomlConfig {
    config_from_file(path).unwrap_or_else(|e| {
        warn!("Using defaults for the {which} config because loading it failed: {e}");
        TomlConfig::default()
    })
}

/// User config overrides vendor config and vendor config overrides hardcoded defaults.
pub fn load_from(user_path: &Path, vendor_path: &Path) -> Config {
    let vendor = load_or_default(vendor_path, "vendor");
    let user = load_or_default(user_path, "user");
    trace!("Merging user config {user:?} with vendor config {vendor:?}");
    let config: Config = user.merge(vendor).into();
    trace!("Resulting config: {config:?}");
    config
}

pub fn load() -> Config {
    load_from(Path::new(USER_CONFIG_PATH), Path::new(VENDOR_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use std::path::PathBuf;

    fn write_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("stemlabd-{}-{name}.toml", std::process::id()));
        std::fs::write(&path, contents).expect("failed to write config");
        path
    }

    #[gtest]
    fn missing_files_fall_back_to_defaults() {
        let config = load_from(
            Path::new("/nonexistent/user.toml"),
            Path::new("/nonexistent/vendor.toml"),
        );
        assert_that!(config, eq(&Config::default()));
        assert_that!(config.board.hostname, eq(DEFAULT_HOSTNAME));
        assert_that!(config.board.port, eq(DEFAULT_PORT));
        assert_that!(config.board.timeout, eq(Duration::from_millis(DEFAULT_TIMEOUT_MS)));
        assert!(!config.board.simulate);
        assert_that!(config.modules, eq(DEFAULT_MODULES));
    }

    #[gtest]
    fn user_overrides_vendor_field_by_field() {
        let vendor = write_config(
            "vendor",
            "[board]\nhostname = \"rp-f0a1b2.local\"\nport = 3000\n\n[modules]\nnames = [\"pid\"]\n",
        );
        let user = write_config("user", "[board]\nport = 4000\nsimulate = true\n");
        let config = load_from(&user, &vendor);
        assert_that!(config.board.hostname, eq("rp-f0a1b2.local"));
        assert_that!(config.board.port, eq(4000));
        assert!(config.board.simulate);
        assert_that!(config.modules, eq(&vec!["pid".to_string()]));
        let _ = std::fs::remove_file(vendor);
        let _ = std::fs::remove_file(user);
    }

    #[gtest]
    fn malformed_files_are_ignored() {
        let user = write_config("malformed", "[board\nport = ");
        let config = load_from(&user, Path::new("/nonexistent/vendor.toml"));
        assert_that!(config, eq(&Config::default()));
        let _ = std::fs::remove_file(user);
    }
}
