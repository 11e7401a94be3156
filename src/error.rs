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

use log::error;
use std::path::PathBuf;
use zbus::fdo;

#[derive(Debug, thiserror::Error)]
pub enum StemlabError {
    #[error("StemlabError::Argument: {0}")]
    Argument(String),
    #[error("StemlabError::UnknownModule: No module named '{0}' on this board")]
    UnknownModule(String),
    #[error("StemlabError::UnknownAttribute: Module '{module}' has no attribute '{attribute}'")]
    UnknownAttribute { module: String, attribute: String },
    #[error("StemlabError::ReadOnly: {0} cannot be written")]
    ReadOnly(String),
    #[error("StemlabError::Io: An IO error occurred when {context}: {e}")]
    Io { context: String, e: std::io::Error },
    #[error(
        "StemlabError::Desync: Response header {received:02x?} does not echo request header {expected:02x?}"
    )]
    Desync { expected: [u8; 8], received: [u8; 8] },
    #[error(
        "StemlabError::Unavailable: Transaction at address 0x{address:08X} failed after {attempts} attempts"
    )]
    Unavailable { address: u32, attempts: usize },
    #[error("StemlabError::Connection: {0}")]
    Connection(String),
    #[error("StemlabError::Capacity: {0}")]
    Capacity(String),
    #[error("StemlabError::Setup: Setup of module '{module}' failed: {reason}")]
    Setup { module: String, reason: String },
    #[error("StemlabError::Store: {0}")]
    Store(String),
    #[error("StemlabError::TomlDe: Failed to parse config from {file:?}: {e}")]
    TomlDe { file: PathBuf, e: toml::de::Error },
    #[error("StemlabError::Internal: An Internal error occurred: {0}")]
    Internal(String),
}

impl StemlabError {
    /// Whether the error came from the socket itself and may go away after reconnecting.
    pub fn is_transport(&self) -> bool {
        matches!(self, StemlabError::Io { .. })
    }
}

impl From<StemlabError> for fdo::Error {
    fn from(err: StemlabError) -> Self {
        error!("{err}");
        match err {
            StemlabError::Argument(..) => fdo::Error::InvalidArgs(err.to_string()),
            StemlabError::UnknownModule(..) => fdo::Error::InvalidArgs(err.to_string()),
            StemlabError::UnknownAttribute { .. } => fdo::Error::InvalidArgs(err.to_string()),
            StemlabError::Io { .. } => fdo::Error::IOError(err.to_string()),
            StemlabError::Desync { .. } => fdo::Error::IOError(err.to_string()),
            StemlabError::Unavailable { .. } => fdo::Error::IOError(err.to_string()),
            _ => fdo::Error::Failed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::StemlabError;
    use googletest::prelude::*;
    use zbus::fdo;

    #[gtest]
    fn argument_maps_to_invalid_args() {
        let err: fdo::Error = StemlabError::Argument("bad loops".into()).into();
        assert!(matches!(err, fdo::Error::InvalidArgs(_)));
        assert_that!(err.to_string(), contains_substring("StemlabError::Argument: bad loops"));
    }

    #[gtest]
    fn unavailable_maps_to_io_error() {
        let err: fdo::Error = StemlabError::Unavailable {
            address: 0x40300100,
            attempts: 5,
        }
        .into();
        assert!(matches!(err, fdo::Error::IOError(_)));
        assert_that!(err.to_string(), contains_substring("0x40300100"));
    }

    #[gtest]
    fn only_io_is_transport() {
        let io = StemlabError::Io {
            context: "reading".into(),
            e: std::io::Error::from(std::io::ErrorKind::TimedOut),
        };
        expect_true!(io.is_transport());
        expect_false!(StemlabError::Capacity("too many stages".into()).is_transport());
    }
}
