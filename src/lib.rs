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

//! stemlabd - drive the signal-processing modules of a StemLab FPGA board.
//!
//! The board runs a small monitor server that gives word-level read/write access to the
//! memory-mapped registers of the FPGA design. This crate talks that protocol
//! ([`client`]), models the FPGA design as modules with typed attributes ([`modules`],
//! [`attributes`], [`hardware`]) and serves them over D-Bus ([`comm`]).
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stemlabd::board::Board;
//! use stemlabd::modules::{LogSink, MemoryStore};
//!
//! # fn main() -> Result<(), stemlabd::error::StemlabError> {
//! let config = stemlabd::config::load();
//! let mut board = Board::new(&config, Arc::new(MemoryStore::new()), Arc::new(LogSink))?;
//! board.module_mut("pid0")?.set("p", 0.5)?;
//! # Ok(())
//! # }
//! ```

pub mod attributes;
pub mod board;
pub mod client;
pub mod codec;
pub mod comm;
pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod modules;
pub mod simulator;
