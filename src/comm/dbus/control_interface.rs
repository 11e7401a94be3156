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

use crate::comm::dbus::{SharedBoard, parse_setup, parse_value, validate_name, with_board};
use crate::error::StemlabError;
use log::info;
use zbus::{fdo, interface};

pub struct ControlInterface {
    pub board: SharedBoard,
}

#[interface(name = "com.canonical.stemlabd.control")]
impl ControlInterface {
    /// Set one attribute from a JSON value, e.g. `0.5`, `"in1"` or `[[-1.0, 2.0]]`.
    pub async fn set_attribute(
        &self,
        module: &str,
        attribute: &str,
        json: &str,
    ) -> Result<String, fdo::Error> {
        info!("set_attribute called with module: {module}, attribute: {attribute} and value: {json}");
        validate_name("module", module)?;
        validate_name("attribute", attribute)?;
        let value = parse_value(json)?;
        let (module, attribute) = (module.to_string(), attribute.to_string());
        Ok(with_board(&self.board, move |board| {
            let module = board.module_mut(&module)?;
            module.set(&attribute, value)?;
            let stored = module.get(&attribute)?;
            Ok(format!("{}.{attribute} set to {stored}", module.name()))
        })
        .await?)
    }

    /// Apply a JSON object of setup attributes and derive the setup once.
    pub async fn setup(&self, module: &str, json_object: &str) -> Result<String, fdo::Error> {
        info!("setup called with module: {module} and values: {json_object}");
        validate_name("module", module)?;
        let values = parse_setup(json_object)?;
        let module = module.to_string();
        Ok(with_board(&self.board, move |board| {
            board.module_mut(&module)?.setup(&values)?;
            Ok(format!("{module} set up with {} values", values.len()))
        })
        .await?)
    }

    pub async fn acquire(&self, module: &str, owner: &str) -> Result<String, fdo::Error> {
        info!("acquire called with module: {module} and owner: {owner}");
        validate_name("module", module)?;
        if owner.is_empty() {
            return Err(StemlabError::Argument(
                "An owner is required. Use release to free a module.".into(),
            )
            .into());
        }
        let (module, owner) = (module.to_string(), owner.to_string());
        Ok(with_board(&self.board, move |board| {
            board.module_mut(&module)?.acquire(&owner)?;
            Ok(format!("{module} is owned by {owner}"))
        })
        .await?)
    }

    /// Free a module and restore its persisted setup.
    pub async fn release(&self, module: &str) -> Result<String, fdo::Error> {
        info!("release called with module: {module}");
        validate_name("module", module)?;
        let module = module.to_string();
        Ok(with_board(&self.board, move |board| {
            board.module_mut(&module)?.release()?;
            Ok(format!("{module} released"))
        })
        .await?)
    }

    pub async fn write_registers(&self, address: u32, values: Vec<u32>) -> Result<String, fdo::Error> {
        info!(
            "write_registers called with address: 0x{address:08X} and {} values",
            values.len()
        );
        Ok(with_board(&self.board, move |board| {
            board.write_registers(address, &values)?;
            Ok(format!("{} words written at 0x{address:08X}", values.len()))
        })
        .await?)
    }
}
