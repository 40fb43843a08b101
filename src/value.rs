// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Dynamic values exchanged between the loader and module factories.
//!
//! Module exports, configuration values, and factory arguments are all
//! [`Value`]s. Compound variants are `Arc`-backed so that identity is
//! preserved across the registry: requiring the same module twice yields
//! the same object, and a circular dependent can observe an in-progress
//! exports object while the owning factory is still filling it in.

use parking_lot::RwLock;
use serde::{Deserialize, Deserializer};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::engine::Require;
use crate::plugin::LoaderPlugin;

/// A dynamically typed value with shared-reference semantics.
#[derive(Clone)]
pub enum Value {
    /// No value; a factory returning this keeps its injected `exports`.
    Undefined,
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Double-precision number.
    Number(f64),
    /// Immutable string.
    String(Arc<str>),
    /// Shared mutable array.
    Array(Arc<RwLock<Vec<Value>>>),
    /// Shared mutable string-keyed object.
    Object(Arc<Object>),
    /// A contextual require function (the `require` special dependency).
    Require(Require),
    /// Module metadata (the `module` special dependency).
    Module(Arc<ModuleInfo>),
    /// A loader plugin export.
    Plugin(Arc<dyn LoaderPlugin>),
    /// An arbitrary host value the loader passes through untouched.
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// A fresh empty object.
    pub fn new_object() -> Value {
        Value::Object(Arc::new(Object::default()))
    }

    /// Whether this is `Undefined`.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Borrow the object behind this value, if it is one.
    pub fn as_object(&self) -> Option<&Arc<Object>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// The contextual require behind this value, if it is one.
    pub fn as_require(&self) -> Option<&Require> {
        match self {
            Value::Require(r) => Some(r),
            _ => None,
        }
    }

    /// The module metadata behind this value, if it is one.
    pub fn as_module(&self) -> Option<&Arc<ModuleInfo>> {
        match self {
            Value::Module(m) => Some(m),
            _ => None,
        }
    }

    /// The loader plugin behind this value, if it is one.
    pub fn as_plugin(&self) -> Option<Arc<dyn LoaderPlugin>> {
        match self {
            Value::Plugin(p) => Some(p.clone()),
            _ => None,
        }
    }

    /// String content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric content, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Identity comparison: value equality for scalars and strings,
    /// pointer equality for everything `Arc`-backed.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Require(a), Value::Require(b)) => a.same_instance(b),
            (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(a, b),
            (Value::Plugin(a), Value::Plugin(b)) => Arc::ptr_eq(a, b),
            (Value::Opaque(a), Value::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Convert a JSON value into a loader value.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => Value::Array(Arc::new(RwLock::new(
                items.into_iter().map(Value::from_json).collect(),
            ))),
            serde_json::Value::Object(map) => {
                let obj = Object::default();
                for (k, v) in map {
                    obj.set(k, Value::from_json(v));
                }
                Value::Object(Arc::new(obj))
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Array(a) => write!(f, "Array(len={})", a.read().len()),
            Value::Object(o) => write!(f, "Object(len={})", o.len()),
            Value::Require(r) => write!(f, "Require(context={:?})", r.context()),
            Value::Module(m) => write!(f, "Module({})", m.id()),
            Value::Plugin(_) => write!(f, "Plugin(..)"),
            Value::Opaque(_) => write!(f, "Opaque(..)"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s.as_str()))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from_json(raw))
    }
}

/// A shared mutable string-keyed object.
///
/// This is the shape of injected `exports` objects; factories and circular
/// dependents mutate and observe it through the same `Arc`.
#[derive(Default)]
pub struct Object {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl Object {
    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    /// Insert or replace a key.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.entries.write().insert(key.into(), value);
    }

    /// Remove a key, returning its previous value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.write().remove(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the object has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of the current keys.
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.read().iter()).finish()
    }
}

/// Metadata handed to factories that declare the `module` special dependency.
#[derive(Debug)]
pub struct ModuleInfo {
    id: String,
    config: Option<Value>,
}

impl ModuleInfo {
    pub(crate) fn new(id: &str, config: Option<Value>) -> Self {
        Self {
            id: id.to_string(),
            config,
        }
    }

    /// The normalized id of the module being executed.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The exact value configured for this module id, identity preserved.
    pub fn config(&self) -> Option<Value> {
        self.config.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_identity_is_per_arc() {
        let a = Value::new_object();
        let b = Value::new_object();
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
    }

    #[test]
    fn scalars_compare_by_value() {
        assert!(Value::from(1.5).same(&Value::from(1.5)));
        assert!(Value::from("x").same(&Value::from("x")));
        assert!(!Value::from("x").same(&Value::from("y")));
        assert!(!Value::from(1.0).same(&Value::from("1")));
    }

    #[test]
    fn from_json_converts_nested_structures() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"a": 1, "b": [true, null], "c": "s"}"#).unwrap();
        let v = Value::from_json(json);
        let obj = v.as_object().unwrap();
        assert_eq!(obj.get("a").unwrap().as_f64(), Some(1.0));
        assert_eq!(obj.get("c").unwrap().as_str(), Some("s"));
        match obj.get("b").unwrap() {
            Value::Array(items) => assert_eq!(items.read().len(), 2),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn exports_object_mutation_is_visible_through_clones() {
        let exports = Value::new_object();
        let alias = exports.clone();
        exports.as_object().unwrap().set("answer", Value::from(42.0));
        assert_eq!(
            alias.as_object().unwrap().get("answer").unwrap().as_f64(),
            Some(42.0)
        );
    }
}
