// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # derrick
//!
//! An AMD-style module definition and resolution engine, decoupled from any
//! particular script runtime.
//!
//! The crate implements the module side of an AMD loader:
//!
//! - `define` / `require` with contextual relative-id resolution
//! - the special dependencies `require`, `exports`, and `module`
//! - layered configuration: `baseUrl`, `paths`, `map`, `packages`, `shim`,
//!   and per-module `config` values
//! - the loader plugin protocol (`plugin!resource` ids)
//! - on-demand source fetching through a pluggable transport and host
//!
//! Fetching and evaluation are injected through the [`SourceFetcher`] and
//! [`ScriptHost`] traits, so the engine runs the same against a network
//! transport, a filesystem, or in-memory test doubles.
//!
//! ## Quick Start
//!
//! ```rust
//! use derrick::{Loader, Value};
//!
//! let loader = Loader::new();
//! loader
//!     .define("greeting", &[], |_| Ok(Value::from("hello")))
//!     .unwrap();
//! loader
//!     .define("app", &["greeting"], |deps| {
//!         Ok(Value::from(format!("{} world", deps[0].as_str().unwrap())))
//!     })
//!     .unwrap();
//!
//! loader.require(&["app"], |result| {
//!     let values = result.unwrap();
//!     assert_eq!(values[0].as_str(), Some("hello world"));
//! });
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod plugin;
pub mod registry;
pub mod resolver;
pub mod value;

pub use config::{Config, ConfigUpdate, PackageDescriptor, ShimSpec};
pub use engine::{Loader, Require};
pub use error::{AmdError, Result};
pub use host::{FetchComplete, ScriptHost, SourceFetcher};
pub use plugin::{LoaderPlugin, OnLoad};
pub use registry::ModuleState;
pub use value::{ModuleInfo, Object, Value};

/// Crate version, from the package manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
