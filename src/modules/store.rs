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

use crate::attributes::Value;
use crate::error::StemlabError;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// The persisted setup of one module, keyed by attribute name.
pub type ModuleState = BTreeMap<String, Value>;

/// Where the setup of free modules is persisted and restored from.
pub trait StateStore: Send + Sync {
    /// The persisted state of `module`, empty if nothing was ever saved.
    fn load(&self, module: &str) -> Result<ModuleState, StemlabError>;
    fn save(&self, module: &str, state: &ModuleState) -> Result<(), StemlabError>;
}

#[derive(Default)]
pub struct MemoryStore {
    modules: Mutex<HashMap<String, ModuleState>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

impl StateStore for MemoryStore {
    fn load(&self, module: &str) -> Result<ModuleState, StemlabError> {
        let modules = self
            .modules
            .lock()
            .map_err(|_| StemlabError::Store("state store lock poisoned".into()))?;
        Ok(modules.get(module).cloned().unwrap_or_default())
    }

    fn save(&self, module: &str, state: &ModuleState) -> Result<(), StemlabError> {
        let mut modules = self
            .modules
            .lock()
            .map_err(|_| StemlabError::Store("state store lock poisoned".into()))?;
        modules.insert(module.to_string(), state.clone());
        Ok(())
    }
}
