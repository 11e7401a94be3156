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

//! Module classes, instances and the registry that creates them.
//!
//! A module groups the attributes and registers of one functional unit of the FPGA design.
//! Everything that is the same for all instances of a unit lives in its [`ModuleClass`],
//! composed once per class. Behaviour that differs between units (how the setup is derived
//! from the attributes, what to do when the owner changes) is provided by a [`ModuleKind`].
//!
//! # Registry
//!
//! Hardware modules register a constructor under their class name at startup, see
//! [`crate::hardware::register_modules`]. The board then instantiates modules by class name:
//!
//! ```rust,no_run
//! # use stemlabd::modules::{module_entry, ModuleContext};
//! # fn example(context: ModuleContext) -> Result<(), stemlabd::error::StemlabError> {
//! stemlabd::hardware::register_modules();
//! let entry = module_entry("pid")?;
//! let pid0 = (entry.constructor)("pid0", context)?;
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod module;
pub mod store;

use crate::attributes::Attribute;
use crate::client::MonitorClient;
use crate::error::StemlabError;
pub use events::{ChannelSink, Event, LogSink, NotificationSink};
use log::warn;
pub use module::{Module, Selection, SetupGuard};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
pub use store::{MemoryStore, ModuleState, StateStore};

/// Per-class behaviour of a module. One instance per module, so it may hold instance state.
pub trait ModuleKind: Send + Sync {
    /// Derive and program the hardware configuration from the current attribute values.
    ///
    /// Always runs inside the setup guard, so attribute writes made here do not re-trigger it.
    fn setup(&self, _module: &mut Module) -> Result<(), StemlabError> {
        Ok(())
    }

    /// Called after the owner changed, before a released module restores its setup.
    fn ownership_changed(
        &self,
        _module: &mut Module,
        _old: Option<&str>,
        _new: Option<&str>,
    ) -> Result<(), StemlabError> {
        Ok(())
    }

    /// Release whatever the module holds before it is dropped.
    fn clear(&self, _module: &mut Module) -> Result<(), StemlabError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;
}

/// The attributes shared by every module of one class.
#[derive(Debug, Clone)]
pub struct ModuleClass {
    pub name: &'static str,
    attributes: Vec<Attribute>,
    setup_attributes: Vec<&'static str>,
}

/// Keep the last occurrence of every element, in the order of those last occurrences.
fn unique_last_wins<T: Clone>(items: &[T], same: impl Fn(&T, &T) -> bool) -> Vec<T> {
    items
        .iter()
        .enumerate()
        .filter(|(i, item)| !items[i + 1..].iter().any(|later| same(item, later)))
        .map(|(_, item)| item.clone())
        .collect()
}

impl ModuleClass {
    pub fn builder(name: &'static str) -> ModuleClassBuilder {
        ModuleClassBuilder {
            name,
            attributes: Vec::new(),
            setup_attributes: Vec::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// The attributes that make up the persisted configuration, in restore order.
    pub fn setup_attributes(&self) -> &[&'static str] {
        &self.setup_attributes
    }

    pub fn is_setup_attribute(&self, name: &str) -> bool {
        self.setup_attributes.contains(&name)
    }
}

pub struct ModuleClassBuilder {
    name: &'static str,
    attributes: Vec<Attribute>,
    setup_attributes: Vec<&'static str>,
}

impl ModuleClassBuilder {
    /// Start from everything `base` declares.
    pub fn extends(mut self, base: &ModuleClass) -> ModuleClassBuilder {
        self.attributes.extend(base.attributes.iter().cloned());
        self.setup_attributes
            .extend(base.setup_attributes.iter().copied());
        self
    }

    pub fn attribute(mut self, attribute: Attribute) -> ModuleClassBuilder {
        self.attributes.push(attribute);
        self
    }

    pub fn setup_attributes(mut self, names: &[&'static str]) -> ModuleClassBuilder {
        self.setup_attributes.extend_from_slice(names);
        self
    }

    /// A redeclared attribute replaces the earlier declaration, last declaration wins.
    pub fn build(self) -> ModuleClass {
        let attributes = unique_last_wins(&self.attributes, |a, b| a.name == b.name);
        let setup_attributes = unique_last_wins(&self.setup_attributes, |a, b| a == b);
        for name in &setup_attributes {
            if !attributes.iter().any(|a| a.name == *name) {
                warn!("Setup attribute {name} of {} is not declared", self.name);
            }
        }
        ModuleClass {
            name: self.name,
            attributes,
            setup_attributes,
        }
    }
}

/// What a module needs from the board it belongs to.
#[derive(Clone)]
pub struct ModuleContext {
    pub client: Option<Arc<MonitorClient>>,
    pub store: Arc<dyn StateStore>,
    pub sink: Arc<dyn NotificationSink>,
    pub parent: Option<String>,
    /// Ratio of the actual FPGA clock to its nominal 125 MHz.
    pub frequency_correction: f64,
}

impl ModuleContext {
    /// A context without a board: software attributes only, state kept in memory.
    pub fn detached() -> ModuleContext {
        ModuleContext {
            client: None,
            store: Arc::new(MemoryStore::new()),
            sink: Arc::new(LogSink),
            parent: None,
            frequency_correction: 1.0,
        }
    }
}

/// Type alias for module constructor functions.
///
/// Constructors take the instance name and the board context and return a ready module.
pub type ModuleConstructor = fn(&str, ModuleContext) -> Result<Module, StemlabError>;

#[derive(Clone, Copy)]
pub struct ModuleEntry {
    pub constructor: ModuleConstructor,
    /// Instances are told apart by a number in their name (`pid0`, `pid1`).
    pub numbered: bool,
}

/// Class name to constructor, filled by [`register_module_class`].
pub static MODULE_REGISTRY: OnceLock<Mutex<HashMap<&'static str, ModuleEntry>>> =
    OnceLock::new();

fn init_module_registry() -> Mutex<HashMap<&'static str, ModuleEntry>> {
    Mutex::new(HashMap::new())
}

pub fn register_module_class(class: &'static str, entry: ModuleEntry) {
    let mut registry = MODULE_REGISTRY
        .get_or_init(init_module_registry)
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    registry.insert(class, entry);
}

/// Look up a registered module class.
///
/// # Returns: `Result<ModuleEntry, StemlabError>`
/// * `Ok(ModuleEntry)` - How to build instances of the class
/// * `Err(StemlabError::UnknownModule)` - No class registered under that name
/// * `Err(StemlabError::Internal)` - Registry not initialized or lock failure
pub fn module_entry(class: &str) -> Result<ModuleEntry, StemlabError> {
    let registry = MODULE_REGISTRY
        .get()
        .ok_or(StemlabError::Internal(String::from(
            "couldn't get MODULE_REGISTRY",
        )))?
        .lock()
        .map_err(|_| StemlabError::Internal(String::from("couldn't lock MODULE_REGISTRY")))?;
    registry
        .get(class)
        .copied()
        .ok_or_else(|| StemlabError::UnknownModule(class.to_string()))
}

/// Name the instances of a list of classes.
///
/// Numbered classes and classes that occur more than once get their occurrence appended
/// (`pid0`, `pid1`); the others keep the class name.
pub fn instance_names(classes: &[String]) -> Result<Vec<(String, String)>, StemlabError> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut names = Vec::with_capacity(classes.len());
    for class in classes {
        let entry = module_entry(class)?;
        let occurrence = seen.entry(class.as_str()).or_default();
        let repeated = classes.iter().filter(|c| *c == class).count() > 1;
        let name = if entry.numbered || repeated {
            format!("{class}{occurrence}")
        } else {
            class.clone()
        };
        *occurrence += 1;
        names.push((class.clone(), name));
    }
    Ok(names)
}
