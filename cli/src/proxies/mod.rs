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

//! DBus proxy interfaces for the stemlabd daemon.
//!
//! The proxies are generated with the `zbus` `#[proxy]` macro and give the command handlers
//! typed, asynchronous access to the daemon.
//!
//! # DBus Service Information
//!
//! - **Service Name**: `com.canonical.stemlabd`
//! - **Control Interface**: `com.canonical.stemlabd.control` at `/com/canonical/stemlabd/control`
//! - **Status Interface**: `com.canonical.stemlabd.status` at `/com/canonical/stemlabd/status`

pub mod control_proxy;
pub mod status_proxy;
