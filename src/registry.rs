// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The module record table and per-record lifecycle state.
//!
//! Records are owned exclusively by the registry; the engine mutates state
//! through the engine's lock and never exposes a record outside it.

use std::collections::HashMap;

use crate::error::AmdError;
use crate::resolver::Dependency;
use crate::value::Value;

/// A module factory: receives the resolved dependency exports in declared
/// order and produces the module's export value.
pub type Factory = Box<dyn FnOnce(&[Value]) -> anyhow::Result<Value> + Send>;

/// How a module's export is produced.
pub enum Definition {
    /// Invoke a factory with the dependency exports.
    Factory(Factory),
    /// A constant export; no factory invocation.
    Value(Value),
}

/// Lifecycle state of a module record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Something asked for the id; no definition registered yet.
    Requested,
    /// External loader I/O (or a plugin's `load`) is in flight for this id.
    Fetching,
    /// A definition is registered but dependencies are not all ready.
    DefinedPending,
    /// All dependencies ready; the factory is being invoked.
    Executing,
    /// The export is final.
    Ready,
    /// Fetch or execution failed; absorbing.
    Failed,
}

/// One entry in the registry.
pub struct ModuleRecord {
    pub(crate) id: String,
    pub(crate) state: ModuleState,
    pub(crate) deps: Vec<Dependency>,
    pub(crate) definition: Option<Definition>,
    pub(crate) exports: Option<Value>,
    pub(crate) exports_obj: Option<Value>,
    pub(crate) error: Option<AmdError>,
    pub(crate) demanded: bool,
}

impl ModuleRecord {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: ModuleState::Requested,
            deps: Vec::new(),
            definition: None,
            exports: None,
            exports_obj: None,
            error: None,
            demanded: false,
        }
    }

    /// The record's normalized module id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The record's current lifecycle state.
    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// Whether the record has reached an absorbing state.
    pub fn is_settled(&self) -> bool {
        matches!(self.state, ModuleState::Ready | ModuleState::Failed)
    }

    /// The module's injected exports object, created on first use. Circular
    /// dependents receive this object while the factory is still running.
    pub(crate) fn interim_exports(&mut self) -> Value {
        self.exports_obj
            .get_or_insert_with(Value::new_object)
            .clone()
    }
}

/// The table of all known module records plus the reverse dependency edges
/// used to retry dependents when a module settles.
#[derive(Default)]
pub(crate) struct Registry {
    records: HashMap<String, ModuleRecord>,
    dependents: HashMap<String, Vec<String>>,
}

impl Registry {
    pub(crate) fn get(&self, id: &str) -> Option<&ModuleRecord> {
        self.records.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut ModuleRecord> {
        self.records.get_mut(id)
    }

    pub(crate) fn get_or_create(&mut self, id: &str) -> &mut ModuleRecord {
        self.records
            .entry(id.to_string())
            .or_insert_with(|| ModuleRecord::new(id))
    }

    pub(crate) fn state(&self, id: &str) -> Option<ModuleState> {
        self.records.get(id).map(|r| r.state)
    }

    /// Record that `dependent` is blocked on `dep` settling.
    pub(crate) fn add_dependent(&mut self, dep: &str, dependent: &str) {
        let entry = self.dependents.entry(dep.to_string()).or_default();
        if !entry.iter().any(|d| d == dependent) {
            entry.push(dependent.to_string());
        }
    }

    /// Drain the modules blocked on `dep`, in registration order.
    pub(crate) fn take_dependents(&mut self, dep: &str) -> Vec<String> {
        self.dependents.remove(dep).unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_start_requested() {
        let mut registry = Registry::default();
        let record = registry.get_or_create("a");
        assert_eq!(record.state(), ModuleState::Requested);
        assert!(!record.is_settled());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn interim_exports_is_stable_per_record() {
        let mut registry = Registry::default();
        let record = registry.get_or_create("a");
        let first = record.interim_exports();
        let second = record.interim_exports();
        assert!(first.same(&second));
    }

    #[test]
    fn dependents_deduplicate_and_drain_in_order() {
        let mut registry = Registry::default();
        registry.add_dependent("dep", "x");
        registry.add_dependent("dep", "y");
        registry.add_dependent("dep", "x");
        assert_eq!(registry.take_dependents("dep"), vec!["x", "y"]);
        assert!(registry.take_dependents("dep").is_empty());
    }
}
