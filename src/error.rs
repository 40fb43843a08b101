// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the derrick loader.

use std::sync::Arc;
use thiserror::Error;

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, AmdError>;

/// Errors surfaced by the module definition and resolution engine.
///
/// The enum is `Clone` because a single failure fans out to every current
/// and future waiter of the failed module; underlying causes are shared
/// behind an `Arc` rather than duplicated.
#[derive(Error, Debug, Clone)]
pub enum AmdError {
    /// A `./` or `../` id was resolved without a requesting module context.
    #[error("relative module id '{0}' used outside a module context")]
    InvalidRelativeId(String),

    /// A module id that already carries a definition was defined again.
    #[error("module '{0}' is already defined")]
    DuplicateDefinition(String),

    /// A synchronous require hit a module that is not ready.
    #[error("module '{0}' has not been defined yet")]
    NotYetDefined(String),

    /// Fetching, evaluating, or executing a module failed.
    #[error("failed to load module '{id}': {cause}")]
    ModuleLoad {
        /// The normalized id of the module that failed.
        id: String,
        /// The underlying fetch, evaluation, or factory error.
        cause: Arc<anyhow::Error>,
    },

    /// A module used with `!` plugin syntax does not export a loader plugin.
    #[error("module '{0}' does not implement the loader plugin contract")]
    PluginContract(String),

    /// Malformed configuration input or misuse of the define surface.
    #[error("configuration error: {0}")]
    Config(String),
}

impl AmdError {
    /// Create a `ModuleLoad` error for `id` wrapping `cause`.
    pub fn module_load(id: impl Into<String>, cause: anyhow::Error) -> Self {
        Self::ModuleLoad {
            id: id.into(),
            cause: Arc::new(cause),
        }
    }

    /// The module id this error is about, when it names one.
    pub fn module_id(&self) -> Option<&str> {
        match self {
            Self::InvalidRelativeId(id)
            | Self::DuplicateDefinition(id)
            | Self::NotYetDefined(id)
            | Self::PluginContract(id) => Some(id),
            Self::ModuleLoad { id, .. } => Some(id),
            Self::Config(_) => None,
        }
    }
}
