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

//! StemLab daemon (stemlabd) - System service driving the DSP modules of a StemLab board.
//!
//! The daemon connects to the monitor server of the configured board, creates the configured
//! hardware modules and serves them on the system bus:
//! - Exposes two DBus interfaces: `control` and `status`
//! - Keeps every module's setup while it is free and restores it on release
//! - Shares one board connection between all clients
//!
//! # DBus Service
//!
//! - **Service Name**: `com.canonical.stemlabd`
//! - **Status Interface**: `/com/canonical/stemlabd/status` - Read-only operations
//! - **Control Interface**: `/com/canonical/stemlabd/control` - Write operations
//!
//! # Environment Variables
//!
//! - `RUST_LOG` - Controls logging level (`trace`, `debug`, `info`, `warn`, `error`
//!   or `off`). Defaults to `info`
//!
//! # Configuration
//!
//! See [`stemlabd::config`] for the TOML files read at startup.

use log::info;
use std::error::Error;
use std::future::pending;
use std::sync::{Arc, Mutex};
use stemlabd::board::Board;
use stemlabd::comm::dbus::{control_interface::ControlInterface, status_interface::StatusInterface};
use stemlabd::modules::{LogSink, MemoryStore};
use zbus::connection;

/// Main entry point for the stemlabd daemon.
///
/// Initializes the daemon by:
/// 1. Setting up logging (defaults to "info" level, repeated records are dropped)
/// 2. Loading the configuration
/// 3. Connecting to the board and creating its modules
/// 4. Connecting to the system DBus and advertising the service
/// 5. Running indefinitely to serve DBus requests
///
/// # Returns: `Result<(), Box<dyn Error>>`
/// * `Ok(())` - Never returns under normal operation (runs until terminated)
/// * `Err(Box<dyn Error>)` - Initialization error (board unreachable, DBus connection failed, etc.)
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    stemlabd::logging::init()?;
    let config = stemlabd::config::load();

    let board = tokio::task::spawn_blocking(move || {
        Board::new(&config, Arc::new(MemoryStore::new()), Arc::new(LogSink))
    })
    .await??;
    let board = Arc::new(Mutex::new(board));

    let status_interface = StatusInterface {
        board: board.clone(),
    };
    let control_interface = ControlInterface {
        board: board.clone(),
    };

    let _conn = connection::Builder::system()?
        .name("com.canonical.stemlabd")?
        .serve_at("/com/canonical/stemlabd/status", status_interface)?
        .serve_at("/com/canonical/stemlabd/control", control_interface)?
        .build()
        .await?;

    info!("Started com.canonical.stemlabd dbus service");
    pending::<()>().await;

    Ok(())
}
