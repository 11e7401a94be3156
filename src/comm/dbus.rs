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

//! The D-Bus surface of the daemon.
//!
//! Both interfaces share one [`Board`] behind a mutex. Board operations block on the network,
//! so every call runs on the blocking thread pool via [`with_board`] and the async executor
//! stays free to serve other requests.

pub mod control_interface;
pub mod status_interface;

use crate::attributes::Value;
use crate::board::Board;
use crate::error::StemlabError;
use crate::modules::ModuleState;
use std::sync::{Arc, Mutex};

pub type SharedBoard = Arc<Mutex<Board>>;

/// Run `f` on the blocking thread pool with exclusive access to the board.
pub(crate) async fn with_board<T, F>(board: &SharedBoard, f: F) -> Result<T, StemlabError>
where
    T: Send + 'static,
    F: FnOnce(&mut Board) -> Result<T, StemlabError> + Send + 'static,
{
    let board = board.clone();
    tokio::task::spawn_blocking(move || {
        let mut board = board
            .lock()
            .map_err(|_| StemlabError::Internal(String::from("board lock poisoned")))?;
        f(&mut board)
    })
    .await
    .map_err(|e| StemlabError::Internal(format!("board task failed: {e}")))?
}

/// Helper function to reject names that cannot belong to a module or attribute.
pub(crate) fn validate_name(what: &str, name: &str) -> Result<(), StemlabError> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StemlabError::Argument(format!(
            "'{name}' is not a valid {what} name"
        )));
    }
    Ok(())
}

/// Parse a JSON object of attribute values, e.g. `{"p": 0.5, "input": "in1"}`.
pub(crate) fn parse_setup(json: &str) -> Result<ModuleState, StemlabError> {
    serde_json::from_str::<ModuleState>(json)
        .map_err(|e| StemlabError::Argument(format!("'{json}' is not a JSON object of values: {e}")))
}

pub(crate) fn to_json(value: &impl serde::Serialize) -> Result<String, StemlabError> {
    serde_json::to_string(value)
        .map_err(|e| StemlabError::Internal(format!("failed to serialize a value: {e}")))
}

pub(crate) fn parse_value(json: &str) -> Result<Value, StemlabError> {
    Value::from_json(json)
}
