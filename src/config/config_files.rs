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

use crate::config::{BoardConfig, Config, DEFAULT_HOSTNAME, DEFAULT_MODULES, DEFAULT_PORT, DEFAULT_TIMEOUT_MS};
use crate::error::StemlabError;
use log::trace;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// This is the top level struct which holds all sections
#[derive(Debug, Default, Deserialize)]
pub(crate) struct TomlConfig {
    board: Option<BoardToml>,
    modules: Option<ModulesToml>,
}

/// This is the "board" section struct
#[derive(Debug, Default, Deserialize)]
pub(crate) struct BoardToml {
    hostname: Option<String>,
    port: Option<u16>,
    frequency_correction: Option<f64>,
    timeout_ms: Option<u64>,
    reconnect_ports: Option<Vec<u16>>,
    simulate: Option<bool>,
}

/// This is the "modules" section struct
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ModulesToml {
    names: Option<Vec<String>>,
}

impl BoardToml {
    fn merge(self, fallback: BoardToml) -> BoardToml {
        BoardToml {
            hostname: self.hostname.or(fallback.hostname),
            port: self.port.or(fallback.port),
            frequency_correction: self.frequency_correction.or(fallback.frequency_correction),
            timeout_ms: self.timeout_ms.or(fallback.timeout_ms),
            reconnect_ports: self.reconnect_ports.or(fallback.reconnect_ports),
            simulate: self.simulate.or(fallback.simulate),
        }
    }
}

impl TomlConfig {
    pub(crate) fn merge(self, fallback: TomlConfig) -> TomlConfig {
        let board = match (self.board, fallback.board) {
            (Some(board), Some(fallback)) => Some(board.merge(fallback)),
            (board, fallback) => board.or(fallback),
        };
        let modules = match (self.modules, fallback.modules) {
            (Some(modules), Some(fallback)) => Some(ModulesToml {
                names: modules.names.or(fallback.names),
            }),
            (modules, fallback) => modules.or(fallback),
        };
        TomlConfig { board, modules }
    }
}

impl From<BoardToml> for BoardConfig {
    fn from(value: BoardToml) -> Self {
        BoardConfig {
            hostname: value.hostname.unwrap_or_else(|| {
                trace!("No hostname provided. Using hardcoded value.");
                DEFAULT_HOSTNAME.to_string()
            }),
            port: value.port.unwrap_or(DEFAULT_PORT),
            frequency_correction: value.frequency_correction.unwrap_or(1.0),
            timeout: Duration::from_millis(value.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)),
            reconnect_ports: value.reconnect_ports.unwrap_or_default(),
            simulate: value.simulate.unwrap_or(false),
        }
    }
}

impl From<TomlConfig> for Config {
    fn from(value: TomlConfig) -> Self {
        Config {
            board: value.board.unwrap_or_default().into(),
            modules: value
                .modules
                .and_then(|modules| modules.names)
                .unwrap_or_else(|| {
                    trace!("No module names provided. Using hardcoded value.");
                    DEFAULT_MODULES.iter().map(|name| name.to_string()).collect()
                }),
        }
    }
}

fn toml_str_to_config(toml_string: &str, file_path: &Path) -> Result<TomlConfig, StemlabError> {
    toml::from_str(toml_string).map_err(|e| StemlabError::TomlDe {
        file: file_path.to_path_buf(),
        e,
    })
}

pub(crate) fn config_from_file(file_path: &Path) -> Result<TomlConfig, StemlabError> {
    if !file_path.is_file() {
        return Err(StemlabError::Internal(format!(
            "Config file not found in {file_path:?}"
        )));
    }
    let toml_string = std::fs::read_to_string(file_path).map_err(|e| StemlabError::Io {
        context: format!("reading {file_path:?}"),
        e,
    })?;
    toml_str_to_config(&toml_string, file_path)
}
