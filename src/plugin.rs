// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The loader plugin protocol.
//!
//! A module becomes a plugin by exporting a [`LoaderPlugin`]
//! (`Value::Plugin`). When an id of the form `plugin!resource` is required,
//! the engine brings the plugin module itself to ready, then delegates the
//! resource to its `load` capability exactly once. The produced value is
//! cached under the full `plugin!resource` key.

use std::sync::Arc;

use crate::engine::{Inner, Require};
use crate::value::Value;

/// Capability implemented by loader plugin exports.
///
/// `resource_id` is the text after the first unescaped `!`, passed through
/// verbatim; any further `!` splitting is the plugin's business. `require`
/// is bound to the module that requested the plugin resource (the global
/// require for a top-level request), so relative ids inside `load` resolve
/// against the requester. `config` is the value configured for the plugin
/// module's id, if any.
pub trait LoaderPlugin: Send + Sync {
    /// Produce the resource named by `resource_id`, finishing through
    /// `on_load` either synchronously or later.
    fn load(&self, resource_id: &str, require: Require, on_load: OnLoad, config: Option<Value>);
}

/// Single-use completion handle for one plugin resource.
///
/// The first (and only) invocation finalizes the resource's record; the
/// handle is consumed, so a plugin cannot complete twice. Completing after
/// a loader reset is a no-op.
pub struct OnLoad {
    inner: Arc<Inner>,
    id: String,
    epoch: u64,
}

impl OnLoad {
    pub(crate) fn new(inner: Arc<Inner>, id: String, epoch: u64) -> Self {
        Self { inner, id, epoch }
    }

    /// The full `plugin!resource` id being produced.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Finalize the resource: its record becomes ready with `value` as the
    /// export.
    pub fn resolve(self, value: Value) {
        let Self { inner, id, epoch } = self;
        Inner::finish_external(&inner, epoch, &id, Ok(value));
    }

    /// Fail the resource: its record becomes failed, and the cause reaches
    /// every current and future waiter.
    pub fn error(self, cause: anyhow::Error) {
        let Self { inner, id, epoch } = self;
        Inner::finish_external(&inner, epoch, &id, Err(cause));
    }
}
