// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! External collaborators: source transport and the evaluation sandbox.
//!
//! The engine never talks to a network or runs fetched source itself. A
//! [`SourceFetcher`] turns a URL into source text (synchronously or not) and
//! a [`ScriptHost`] evaluates that text in a scope where the loader's
//! `define` is reachable. Both are injected, so tests run against mocks.

use std::sync::Arc;

use crate::engine::Inner;
use crate::value::Value;

/// Loader I/O: retrieves source text for a resolved module URL.
///
/// Invoked exactly once per distinct resolved, non-special, not-yet-defined
/// module id. The transport reports back through the [`FetchComplete`]
/// handle, immediately for synchronous transports or later for asynchronous
/// ones.
pub trait SourceFetcher: Send + Sync {
    /// Fetch `url`, delivering the outcome through `done`.
    fn fetch_source(&self, url: &str, done: FetchComplete);
}

/// Evaluation sandbox: executes fetched source text.
///
/// The source is expected to call `define` on the owning loader during
/// evaluation. `source_name` is advisory, for diagnostics only.
pub trait ScriptHost: Send + Sync {
    /// Execute `source`.
    fn evaluate(&self, source: &str, source_name: &str) -> anyhow::Result<()>;

    /// Look up a sandbox global, used to export shimmed scripts.
    fn global(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// Single-use completion handle for one fetch.
///
/// Delivering after the loader was reset is a no-op; an abandoned session
/// cannot finalize records in the next one.
pub struct FetchComplete {
    inner: Arc<Inner>,
    id: String,
    url: String,
    epoch: u64,
}

impl FetchComplete {
    pub(crate) fn new(inner: Arc<Inner>, id: String, url: String, epoch: u64) -> Self {
        Self {
            inner,
            id,
            url,
            epoch,
        }
    }

    /// The module id this fetch is for.
    pub fn module_id(&self) -> &str {
        &self.id
    }

    /// The URL being fetched.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Hand the fetched source text (or the transport failure) to the
    /// engine. The source is evaluated and the module driven onward.
    pub fn deliver(self, result: anyhow::Result<String>) {
        let Self {
            inner,
            id,
            url,
            epoch,
        } = self;
        Inner::fetch_delivered(&inner, id, url, epoch, result);
    }
}
