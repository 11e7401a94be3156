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

//! One instance of a module class on a board.
//!
//! # Ownership
//!
//! A module is either free or owned by a named client. While free, every change of a setup
//! attribute is persisted to the state store. Acquiring the module stops that, releasing it
//! restores the last persisted setup. Ownership is advisory: acquiring an owned module simply
//! takes it over.
//!
//! # Setup
//!
//! Attributes flagged `call_setup` re-derive the module setup whenever they change. The
//! [`SetupGuard`] returned by [`Module::do_setup`] suppresses that for the writes made while
//! it is alive, so that a batch of changes or the derivation itself only runs it once.

use crate::attributes::{Attribute, Register, RegisterBus, Semantics, Storage, Value};
use crate::client::MonitorClient;
use crate::error::StemlabError;
use crate::modules::{
    Event, ModuleClass, ModuleContext, ModuleKind, ModuleState, NotificationSink, StateStore,
};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// The one element selected across all selectable lists of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub attribute: &'static str,
    pub index: usize,
}

pub struct Module {
    name: String,
    parent: Option<String>,
    class: &'static ModuleClass,
    kind: Arc<dyn ModuleKind>,
    client: Option<Arc<MonitorClient>>,
    base_address: u32,
    store: Arc<dyn StateStore>,
    sink: Arc<dyn NotificationSink>,
    frequency_correction: f64,
    values: HashMap<&'static str, Value>,
    constants: HashMap<u32, u64>,
    owner: Option<String>,
    autosave: bool,
    setup_ongoing: bool,
    selection: Option<Selection>,
}

impl Module {
    pub fn new(
        name: &str,
        base_address: u32,
        class: &'static ModuleClass,
        kind: Arc<dyn ModuleKind>,
        context: ModuleContext,
    ) -> Module {
        Module {
            name: name.to_string(),
            parent: context.parent,
            class,
            kind,
            client: context.client,
            base_address,
            store: context.store,
            sink: context.sink,
            frequency_correction: context.frequency_correction,
            values: HashMap::new(),
            constants: HashMap::new(),
            owner: None,
            autosave: true,
            setup_ongoing: false,
            selection: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn class(&self) -> &'static ModuleClass {
        self.class
    }

    pub fn kind(&self) -> Arc<dyn ModuleKind> {
        self.kind.clone()
    }

    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    pub fn frequency_correction(&self) -> f64 {
        self.frequency_correction
    }

    pub fn client(&self) -> Result<&Arc<MonitorClient>, StemlabError> {
        self.client.as_ref().ok_or_else(|| {
            StemlabError::Connection(format!("module {} is not connected to a board", self.name))
        })
    }

    pub fn attribute(&self, name: &str) -> Result<&'static Attribute, StemlabError> {
        let class: &'static ModuleClass = self.class;
        class
            .attribute(name)
            .ok_or_else(|| StemlabError::UnknownAttribute {
                module: self.name.clone(),
                attribute: name.to_string(),
            })
    }

    pub fn attribute_names(&self) -> Vec<&'static str> {
        self.class.attributes().iter().map(|a| a.name).collect()
    }

    pub fn get(&mut self, name: &str) -> Result<Value, StemlabError> {
        let attribute = self.attribute(name)?;
        attribute.get(self)
    }

    /// Validate, store and propagate a new attribute value.
    ///
    /// Observers are notified, a free module persists the value if it is part of its setup
    /// and `call_setup` attributes re-derive the setup unless a setup is ongoing.
    ///
    /// # Returns: `Result<(), StemlabError>`
    /// * `Ok(())` - Value stored
    /// * `Err(StemlabError::UnknownAttribute)` - No attribute of that name
    /// * `Err(StemlabError::ReadOnly)` - The attribute cannot be written
    /// * `Err(StemlabError::Argument)` - The value was rejected, nothing was changed
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), StemlabError> {
        let attribute = self.attribute(name)?;
        if attribute.is_read_only() {
            return Err(StemlabError::ReadOnly(format!("{}.{}", self.name, name)));
        }
        let value = attribute.validate_and_normalize(self, &value.into())?;
        attribute.set(self, value.clone())?;
        // computed setters may reorder or correct what they were given
        let value = match attribute.storage {
            Storage::Computed { .. } => attribute.get(self)?,
            _ => value,
        };
        self.value_updated(attribute, value)
    }

    fn value_updated(
        &mut self,
        attribute: &'static Attribute,
        value: Value,
    ) -> Result<(), StemlabError> {
        if self.autosave && self.class.is_setup_attribute(attribute.name) {
            self.persist(attribute.name, &value)?;
        }
        self.notify(Event::AttributeChanged {
            module: self.name.clone(),
            attribute: attribute.name.to_string(),
            value,
        });
        if let Some(master) = attribute.master {
            let master = self.attribute(master)?;
            let value = master.get(self)?;
            self.value_updated(master, value)?;
        }
        if attribute.call_setup && !self.setup_ongoing {
            self.run_setup()?;
        }
        Ok(())
    }

    fn persist(&self, name: &str, value: &Value) -> Result<(), StemlabError> {
        let mut state = self.store.load(&self.name)?;
        state.insert(name.to_string(), value.clone());
        self.store.save(&self.name, &state)?;
        debug!("Saved {}.{name} = {value}", self.name);
        Ok(())
    }

    pub fn notify(&self, event: Event) {
        self.sink.notify(event);
    }

    /// Tell observers a requested value did not make it into the module unchanged.
    pub fn report_correction(&self, attribute: &str, requested: Value, stored: Value) {
        self.notify(Event::ValueCorrected {
            module: self.name.clone(),
            attribute: attribute.to_string(),
            requested,
            stored,
        });
    }

    pub(crate) fn stored(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub(crate) fn store_value(&mut self, name: &'static str, value: Value) {
        self.values.insert(name, value);
    }

    /// Read a register of this module. Constants are read from the board only once.
    pub fn read_register(&mut self, register: Register) -> Result<u64, StemlabError> {
        if register.semantics != Semantics::Constant {
            return register.read(&*self);
        }
        if let Some(value) = self.constants.get(&register.address) {
            return Ok(*value);
        }
        let value = register.read(&*self)?;
        self.constants.insert(register.address, value);
        Ok(value)
    }

    pub fn write_register(&mut self, register: Register, value: u64) -> Result<(), StemlabError> {
        register.write(&*self, value)
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn acquire(&mut self, owner: &str) -> Result<(), StemlabError> {
        self.set_owner(Some(owner))
    }

    pub fn release(&mut self) -> Result<(), StemlabError> {
        self.set_owner(None)
    }

    /// Hand the module to `owner`, or free it with `None`.
    ///
    /// # Returns: `Result<(), StemlabError>`
    /// * `Ok(())` - Owner changed and, for a release, the persisted setup restored
    /// * `Err(StemlabError)` - The ownership hook or the restore failed
    pub fn set_owner(&mut self, owner: Option<&str>) -> Result<(), StemlabError> {
        let old = self.owner.take();
        let kind = self.kind.clone();
        self.owner = owner.map(str::to_string);
        match (old.as_deref(), owner) {
            (Some(previous), Some(next)) => {
                info!("{} passes from {previous} to {next}", self.name);
                self.autosave = false;
                kind.ownership_changed(self, Some(previous), None)?;
                kind.ownership_changed(self, None, Some(next))?;
            }
            _ => {
                self.autosave = owner.is_none();
                kind.ownership_changed(self, old.as_deref(), owner)?;
                if owner.is_none() {
                    self.load_setup_attributes()?;
                }
            }
        }
        self.notify(Event::OwnershipChanged {
            module: self.name.clone(),
            old,
            new: self.owner.clone(),
        });
        Ok(())
    }

    pub fn autosave_active(&self) -> bool {
        self.autosave
    }

    pub fn setup_ongoing(&self) -> bool {
        self.setup_ongoing
    }

    pub fn do_setup(&mut self) -> SetupGuard<'_> {
        let previous = self.setup_ongoing;
        self.setup_ongoing = true;
        SetupGuard {
            module: self,
            previous,
        }
    }

    /// Re-derive the setup from the current attribute values.
    pub fn run_setup(&mut self) -> Result<(), StemlabError> {
        let kind = self.kind.clone();
        self.do_setup().run(|module| kind.setup(module))
    }

    /// Assign the given setup attributes and derive the setup once.
    ///
    /// Keys that are not setup attributes of this module are ignored with a warning.
    pub fn setup(&mut self, values: &ModuleState) -> Result<(), StemlabError> {
        let class = self.class;
        for key in values.keys() {
            if !class.is_setup_attribute(key) {
                warn!("{key} is not a setup attribute of {}, ignoring it", self.name);
            }
        }
        let kind = self.kind.clone();
        self.do_setup().run(|module| {
            for name in class.setup_attributes() {
                if let Some(value) = values.get(*name) {
                    module.set(name, value.clone())?;
                }
            }
            kind.setup(module)
        })
    }

    /// Snapshot of the current setup.
    pub fn setup_attributes(&mut self) -> Result<ModuleState, StemlabError> {
        let class = self.class;
        class
            .setup_attributes()
            .iter()
            .map(|name| Ok((name.to_string(), self.get(name)?)))
            .collect()
    }

    /// Restore the last persisted setup. Nothing happens if none was ever persisted.
    pub fn load_setup_attributes(&mut self) -> Result<(), StemlabError> {
        let state = self.store.load(&self.name)?;
        if state.is_empty() {
            debug!("No persisted setup for {}", self.name);
            return Ok(());
        }
        debug!("Restoring {} from {state:?}", self.name);
        self.setup(&state)
    }

    pub fn selection(&self) -> Option<Selection> {
        self.selection
    }

    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.selection = selection;
    }

    /// Let the module release what it holds and drop the board connection.
    pub fn clear(&mut self) -> Result<(), StemlabError> {
        let kind = self.kind.clone();
        kind.clear(self)?;
        self.values.clear();
        self.constants.clear();
        self.selection = None;
        self.client = None;
        Ok(())
    }
}

impl RegisterBus for Module {
    fn read_words(&self, offset: u32, length: usize) -> Result<Vec<u32>, StemlabError> {
        self.client()?.read(self.base_address + offset, length)
    }

    fn write_words(&self, offset: u32, values: &[u32]) -> Result<(), StemlabError> {
        self.client()?.write(self.base_address + offset, values)
    }
}

/// Marks a module as being set up for as long as it lives.
///
/// Dropping the guard restores the flag it found, so nested guards only clear it when the
/// outermost one goes away.
pub struct SetupGuard<'a> {
    module: &'a mut Module,
    previous: bool,
}

impl SetupGuard<'_> {
    /// Run `f` under this guard. A failure is logged once the flag is restored, then returned.
    pub fn run<T>(
        mut self,
        f: impl FnOnce(&mut Module) -> Result<T, StemlabError>,
    ) -> Result<T, StemlabError> {
        let result = f(&mut *self.module);
        let name = self.module.name.clone();
        drop(self);
        if let Err(e) = &result {
            error!("Setup of {name} failed: {e}");
        }
        result
    }
}

impl Deref for SetupGuard<'_> {
    type Target = Module;

    fn deref(&self) -> &Module {
        self.module
    }
}

impl DerefMut for SetupGuard<'_> {
    fn deref_mut(&mut self) -> &mut Module {
        self.module
    }
}

impl Drop for SetupGuard<'_> {
    fn drop(&mut self) {
        self.module.setup_ongoing = self.previous;
    }
}
