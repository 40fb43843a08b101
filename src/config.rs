// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Layered loader configuration and its merge rules.
//!
//! Configuration arrives in [`ConfigUpdate`] batches (programmatically or as
//! a JSON blob) and is folded into the single [`Config`] the resolver reads.
//! Successive merges are recursive: scalars overwrite, maps merge entry-wise
//! with new entries winning, and sequences concatenate with de-duplication.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::{AmdError, Result};
use crate::value::Value;

/// Resolution rule for a configured package: the package `name` resolves to
/// `location/main` unless a more specific mapping takes precedence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDescriptor {
    /// Identifier prefix the package claims.
    pub name: String,
    /// Directory the package's modules live under. Defaults to `name`.
    pub location: String,
    /// Main module within `location`. Defaults to `main`.
    pub main: String,
}

impl PackageDescriptor {
    /// A descriptor with default `location` and `main`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            location: name.clone(),
            main: "main".to_string(),
            name,
        }
    }

    /// Override the main module name.
    pub fn with_main(mut self, main: impl Into<String>) -> Self {
        self.main = main.into();
        self
    }

    /// Override the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }
}

/// A package entry as accepted by `require.config`: either a bare name or a
/// full descriptor.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PackageSpec {
    /// Bare package name; location and main take their defaults.
    Name(String),
    /// Full descriptor with optional overrides.
    Full {
        /// Identifier prefix the package claims.
        name: String,
        /// Directory override.
        #[serde(default)]
        location: Option<String>,
        /// Main module override.
        #[serde(default)]
        main: Option<String>,
    },
}

impl PackageSpec {
    fn into_descriptor(self) -> PackageDescriptor {
        match self {
            PackageSpec::Name(name) => PackageDescriptor::new(name),
            PackageSpec::Full {
                name,
                location,
                main,
            } => {
                let mut d = PackageDescriptor::new(name);
                if let Some(location) = location {
                    d.location = location;
                }
                if let Some(main) = main {
                    d.main = main;
                }
                d
            }
        }
    }
}

impl From<&str> for PackageSpec {
    fn from(name: &str) -> Self {
        PackageSpec::Name(name.to_string())
    }
}

impl From<PackageDescriptor> for PackageSpec {
    fn from(d: PackageDescriptor) -> Self {
        PackageSpec::Full {
            name: d.name,
            location: Some(d.location),
            main: Some(d.main),
        }
    }
}

/// Shim for a script that does not call `define` itself: the listed `deps`
/// are loaded first and the evaluation sandbox's global named by `exports`
/// becomes the module's export.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShimSpec {
    /// Dependencies to satisfy before the shimmed module is ready.
    #[serde(default)]
    pub deps: Vec<String>,
    /// Name of the sandbox global to export, if any.
    #[serde(default)]
    pub exports: Option<String>,
}

/// One configuration batch, shaped like the object `require.config` accepts.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigUpdate {
    /// New base URL, when present.
    pub base_url: Option<String>,
    /// Path prefix substitutions to merge in.
    pub paths: BTreeMap<String, String>,
    /// Map rules to merge in, keyed by context pattern.
    pub map: BTreeMap<String, BTreeMap<String, String>>,
    /// Packages to add or replace.
    pub packages: Vec<PackageSpec>,
    /// Shims to merge in.
    pub shim: BTreeMap<String, ShimSpec>,
    /// Per-module configuration values to merge in.
    pub config: BTreeMap<String, Value>,
    /// Global dependencies to require once merged.
    pub deps: Vec<String>,
}

impl ConfigUpdate {
    /// An empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an update from a JSON configuration blob.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| AmdError::Config(e.to_string()))
    }

    /// Set the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Add a path prefix substitution.
    pub fn path(mut self, prefix: impl Into<String>, target: impl Into<String>) -> Self {
        self.paths.insert(prefix.into(), target.into());
        self
    }

    /// Add a map rule: when `context` requires `from`, give it `to`.
    pub fn map_rule(
        mut self,
        context: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.map
            .entry(context.into())
            .or_default()
            .insert(from.into(), to.into());
        self
    }

    /// Add a package.
    pub fn package(mut self, spec: impl Into<PackageSpec>) -> Self {
        self.packages.push(spec.into());
        self
    }

    /// Add a shim.
    pub fn shim(mut self, id: impl Into<String>, spec: ShimSpec) -> Self {
        self.shim.insert(id.into(), spec);
        self
    }

    /// Set the configuration value for a module id.
    pub fn module_config(mut self, id: impl Into<String>, value: Value) -> Self {
        self.config.insert(id.into(), value);
        self
    }

    /// Add a global dependency.
    pub fn dep(mut self, id: impl Into<String>) -> Self {
        self.deps.push(id.into());
        self
    }
}

/// The merged configuration the resolver and engine read.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// URL prefix joined onto resolved paths by `toUrl`.
    pub base_url: String,
    /// Path prefix substitutions, applied longest-prefix-first.
    pub paths: BTreeMap<String, String>,
    /// Map rules keyed by context pattern (`*`, exact id, ancestor prefix).
    pub map: BTreeMap<String, BTreeMap<String, String>>,
    /// Configured packages, in configuration order.
    pub packages: Vec<PackageDescriptor>,
    /// Shims for non-defining scripts.
    pub shim: BTreeMap<String, ShimSpec>,
    /// Per-module configuration values, keyed by normalized id.
    pub module_config: BTreeMap<String, Value>,
    /// Accumulated global dependencies.
    pub deps: Vec<String>,
}

impl Config {
    /// Fold an update into this configuration.
    ///
    /// Returns the global dependency ids newly added by this update, which
    /// the engine requires once the merge is complete.
    pub fn merge(&mut self, update: ConfigUpdate) -> Vec<String> {
        if let Some(base_url) = update.base_url {
            self.base_url = base_url;
        }
        self.paths.extend(update.paths);
        for (context, rules) in update.map {
            self.map.entry(context).or_default().extend(rules);
        }
        for spec in update.packages {
            let descriptor = spec.into_descriptor();
            match self.packages.iter_mut().find(|d| d.name == descriptor.name) {
                Some(existing) => *existing = descriptor,
                None => self.packages.push(descriptor),
            }
        }
        self.shim.extend(update.shim);
        self.module_config.extend(update.config);

        let mut added = Vec::new();
        for dep in update.deps {
            if !self.deps.contains(&dep) {
                self.deps.push(dep.clone());
                added.push(dep);
            }
        }
        added
    }

    /// The first configured package whose name claims `id`, either exactly
    /// or as a `/`-delimited prefix.
    pub fn package_for(&self, id: &str) -> Option<&PackageDescriptor> {
        self.packages
            .iter()
            .find(|d| id == d.name || id.strip_prefix(&d.name).is_some_and(|r| r.starts_with('/')))
    }

    /// The configured value for a module id, if any.
    pub fn config_for(&self, id: &str) -> Option<&Value> {
        self.module_config.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_keys_overwrite() {
        let mut config = Config::default();
        config.merge(ConfigUpdate::new().base_url("a"));
        config.merge(ConfigUpdate::new().base_url("b"));
        assert_eq!(config.base_url, "b");
    }

    #[test]
    fn mapping_keys_merge_entry_wise() {
        let mut config = Config::default();
        config.merge(ConfigUpdate::new().path("a", "1").path("b", "2"));
        config.merge(ConfigUpdate::new().path("b", "3").path("c", "4"));
        assert_eq!(config.paths.get("a").unwrap(), "1");
        assert_eq!(config.paths.get("b").unwrap(), "3");
        assert_eq!(config.paths.get("c").unwrap(), "4");
    }

    #[test]
    fn map_rules_merge_within_a_context() {
        let mut config = Config::default();
        config.merge(ConfigUpdate::new().map_rule("*", "a", "x/a"));
        config.merge(ConfigUpdate::new().map_rule("*", "b", "x/b"));
        let star = config.map.get("*").unwrap();
        assert_eq!(star.get("a").unwrap(), "x/a");
        assert_eq!(star.get("b").unwrap(), "x/b");
    }

    #[test]
    fn packages_deduplicate_by_name() {
        let mut config = Config::default();
        config.merge(ConfigUpdate::new().package("dada"));
        config.merge(
            ConfigUpdate::new().package(PackageDescriptor::new("dada").with_main("foo")),
        );
        assert_eq!(config.packages.len(), 1);
        assert_eq!(config.packages[0].main, "foo");
    }

    #[test]
    fn package_lookup_requires_segment_boundary() {
        let mut config = Config::default();
        config.merge(ConfigUpdate::new().package("dada"));
        assert!(config.package_for("dada").is_some());
        assert!(config.package_for("dada/x").is_some());
        assert!(config.package_for("dadaist").is_none());
    }

    #[test]
    fn deps_concatenate_without_duplicates() {
        let mut config = Config::default();
        let first = config.merge(ConfigUpdate::new().dep("a").dep("b"));
        assert_eq!(first, vec!["a", "b"]);
        let second = config.merge(ConfigUpdate::new().dep("b").dep("c"));
        assert_eq!(second, vec!["c"]);
        assert_eq!(config.deps, vec!["a", "b", "c"]);
    }

    #[test]
    fn parses_json_configuration_blob() {
        let update = ConfigUpdate::from_json(
            r#"{
                "baseUrl": "js/",
                "paths": {"jquery": "vendor/jquery"},
                "map": {"*": {"a": "b"}},
                "packages": ["dada", {"name": "gugu", "main": "index"}],
                "shim": {"legacy": {"deps": [], "exports": "Legacy"}},
                "config": {"dada/main": {"answer": 42}},
                "deps": ["dada"]
            }"#,
        )
        .unwrap();

        assert_eq!(update.base_url.as_deref(), Some("js/"));
        assert_eq!(update.packages.len(), 2);

        let mut config = Config::default();
        config.merge(update);
        assert_eq!(config.packages[1].main, "index");
        assert_eq!(config.shim.get("legacy").unwrap().exports.as_deref(), Some("Legacy"));
        let value = config.config_for("dada/main").unwrap();
        assert_eq!(
            value.as_object().unwrap().get("answer").unwrap().as_f64(),
            Some(42.0)
        );
    }
}
