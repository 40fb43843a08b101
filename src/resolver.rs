// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Identifier resolution: relative ids, plugin splitting, map/package/path
//! substitution.
//!
//! Everything here is a pure function of `(raw id, context id, &Config)`;
//! the engine and registry only ever see normalized ids. Resolution order
//! for a plain id: relative resolution against the requesting module's
//! directory, a single map substitution, package-to-main rewriting, then
//! the longest-matching path prefix substitution.

use crate::config::Config;
use crate::error::{AmdError, Result};

/// The three dependency ids satisfied by the engine itself rather than by
/// registry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Special {
    /// The requesting module's contextual require.
    Require,
    /// The module's injected exports object.
    Exports,
    /// The module's metadata object.
    Module,
}

/// A dependency id classified up front, so the engine never string-sniffs
/// at use sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    /// `require`, `exports`, or `module`.
    Special(Special),
    /// An ordinary normalized module id.
    Plain(String),
    /// `plugin!resource`: a resource delegated to a loader plugin.
    Plugin {
        /// Normalized id of the plugin module.
        plugin: String,
        /// Resource id, preserved verbatim (including further `!`s).
        resource: String,
    },
}

impl Dependency {
    /// The registry key backing this dependency, when one exists.
    /// Special dependencies have no record of their own.
    pub fn key(&self) -> Option<String> {
        match self {
            Dependency::Special(_) => None,
            Dependency::Plain(id) => Some(id.clone()),
            Dependency::Plugin { plugin, resource } => Some(format!("{plugin}!{resource}")),
        }
    }
}

/// Recognize `require` / `exports` / `module`.
pub fn special(raw: &str) -> Option<Special> {
    match raw {
        "require" => Some(Special::Require),
        "exports" => Some(Special::Exports),
        "module" => Some(Special::Module),
        _ => None,
    }
}

/// Normalize a raw identifier against a requesting module context.
///
/// Special ids pass through unresolved. A plugin-syntax id has its prefix
/// resolved as a plain id; the resource suffix is reattached verbatim.
/// Resolving an already-normalized id with no context is the identity.
pub fn resolve(raw: &str, context: Option<&str>, config: &Config) -> Result<String> {
    if special(raw).is_some() {
        return Ok(raw.to_string());
    }
    match split_plugin(raw) {
        Some((plugin, resource)) => {
            let plugin = resolve_plain(&plugin, context, config)?;
            Ok(format!("{plugin}!{resource}"))
        }
        None => resolve_plain(raw, context, config),
    }
}

/// Classify a raw identifier into the dependency variant the engine acts on.
pub fn classify(raw: &str, context: Option<&str>, config: &Config) -> Result<Dependency> {
    if let Some(s) = special(raw) {
        return Ok(Dependency::Special(s));
    }
    match split_plugin(raw) {
        Some((plugin, resource)) => Ok(Dependency::Plugin {
            plugin: resolve_plain(&plugin, context, config)?,
            resource,
        }),
        None => Ok(Dependency::Plain(resolve_plain(raw, context, config)?)),
    }
}

/// Join a resolved path onto the configured base URL.
///
/// Absolute paths and ids carrying a protocol are returned untouched; the
/// join never duplicates a trailing slash.
pub fn join_url(resolved: &str, base_url: &str) -> String {
    if base_url.is_empty() || resolved.starts_with('/') || resolved.contains("://") {
        return resolved.to_string();
    }
    format!("{}/{}", base_url.trim_end_matches('/'), resolved)
}

/// Split on the first unescaped `!`. Returns the unescaped plugin prefix and
/// the verbatim resource suffix, or `None` when the id has no plugin syntax.
fn split_plugin(raw: &str) -> Option<(String, String)> {
    let mut prefix = String::new();
    let mut chars = raw.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                // An escaped `!` is a literal part of the id.
                match chars.next() {
                    Some((_, '!')) => prefix.push('!'),
                    Some((_, other)) => {
                        prefix.push('\\');
                        prefix.push(other);
                    }
                    None => prefix.push('\\'),
                }
            }
            '!' => return Some((prefix, raw[i + 1..].to_string())),
            c => prefix.push(c),
        }
    }
    None
}

fn resolve_plain(id: &str, context: Option<&str>, config: &Config) -> Result<String> {
    let id = if id.starts_with("./") || id.starts_with("../") {
        resolve_relative(id, context)?
    } else {
        id.to_string()
    };
    let id = lookup_map(&id, context, config).unwrap_or(id);
    Ok(apply_packages_and_paths(&id, config))
}

/// Resolve a `./` or `../` id against the directory of the requesting module.
fn resolve_relative(id: &str, context: Option<&str>) -> Result<String> {
    let context = context.ok_or_else(|| AmdError::InvalidRelativeId(id.to_string()))?;
    let mut segments: Vec<&str> = context.split('/').collect();
    segments.pop(); // the module's own name; ids resolve within its directory

    for segment in id.split('/') {
        match segment {
            "." | "" => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(AmdError::InvalidRelativeId(id.to_string()));
                }
            }
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

/// Select the map rule for `id` as requested by `context`.
///
/// Patterns are searched most specific first: the exact context id, each
/// ancestor prefix longest first, then `*`. A pattern whose rule set does
/// not mention `id` falls through to the next.
fn lookup_map(id: &str, context: Option<&str>, config: &Config) -> Option<String> {
    if config.map.is_empty() {
        return None;
    }
    let mut rule_sets = Vec::new();
    if let Some(context) = context {
        if let Some(rules) = config.map.get(context) {
            rule_sets.push(rules);
        }
        let mut prefix = context;
        while let Some(pos) = prefix.rfind('/') {
            prefix = &prefix[..pos];
            if let Some(rules) = config.map.get(prefix) {
                rule_sets.push(rules);
            }
        }
    }
    if let Some(rules) = config.map.get("*") {
        rule_sets.push(rules);
    }
    rule_sets.iter().find_map(|rules| rules.get(id).cloned())
}

fn apply_packages_and_paths(id: &str, config: &Config) -> String {
    let mut id = id.to_string();

    if let Some(package) = config.package_for(&id) {
        // A path mapping with a more specific prefix shadows the package.
        let shadowed = longest_path_prefix(&id, config)
            .is_some_and(|(prefix, _)| prefix.len() > package.name.len());
        if !shadowed {
            id = if id == package.name {
                format!("{}/{}", package.location, package.main)
            } else {
                format!("{}{}", package.location, &id[package.name.len()..])
            };
        }
    }

    if let Some((prefix, target)) = longest_path_prefix(&id, config) {
        let target = target.to_string();
        let rest = id[prefix.len()..].to_string();
        id = format!("{target}{rest}");
    }
    id
}

fn longest_path_prefix<'a>(id: &str, config: &'a Config) -> Option<(&'a str, &'a str)> {
    config
        .paths
        .iter()
        .filter(|(prefix, _)| {
            id == prefix.as_str()
                || id
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(prefix, target)| (prefix.as_str(), target.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigUpdate, PackageDescriptor};

    fn config(update: ConfigUpdate) -> Config {
        let mut config = Config::default();
        config.merge(update);
        config
    }

    #[test]
    fn normalized_ids_resolve_to_themselves() {
        let cfg = Config::default();
        for id in ["a", "a/b", "a/b/c"] {
            assert_eq!(resolve(id, None, &cfg).unwrap(), id);
        }
    }

    #[test]
    fn special_ids_pass_through() {
        let cfg = config(ConfigUpdate::new().path("require", "nope"));
        assert_eq!(resolve("require", Some("foo/bar"), &cfg).unwrap(), "require");
        assert_eq!(resolve("exports", None, &cfg).unwrap(), "exports");
        assert_eq!(resolve("module", None, &cfg).unwrap(), "module");
    }

    #[test]
    fn relative_ids_resolve_against_the_context_directory() {
        let cfg = Config::default();
        assert_eq!(resolve("./a", Some("foo/b"), &cfg).unwrap(), "foo/a");
        assert_eq!(resolve("../a", Some("foo/bar/b"), &cfg).unwrap(), "foo/a");
        assert_eq!(resolve("./x/./y", Some("p/q"), &cfg).unwrap(), "p/x/y");
    }

    #[test]
    fn relative_ids_without_context_are_rejected() {
        let cfg = Config::default();
        assert!(matches!(
            resolve("./a", None, &cfg),
            Err(AmdError::InvalidRelativeId(_))
        ));
    }

    #[test]
    fn relative_ids_cannot_escape_the_root() {
        let cfg = Config::default();
        assert!(matches!(
            resolve("../../a", Some("foo/b"), &cfg),
            Err(AmdError::InvalidRelativeId(_))
        ));
    }

    #[test]
    fn plugin_ids_split_on_the_first_unescaped_bang() {
        let cfg = Config::default();
        assert_eq!(
            classify("foo!a!", None, &cfg).unwrap(),
            Dependency::Plugin {
                plugin: "foo".into(),
                resource: "a!".into()
            }
        );
        assert_eq!(
            classify("foo!", None, &cfg).unwrap(),
            Dependency::Plugin {
                plugin: "foo".into(),
                resource: "".into()
            }
        );
        assert_eq!(
            classify(r"a\!b!r", None, &cfg).unwrap(),
            Dependency::Plugin {
                plugin: "a!b".into(),
                resource: "r".into()
            }
        );
    }

    #[test]
    fn plugin_prefix_is_resolved_but_resource_is_verbatim() {
        let cfg = Config::default();
        assert_eq!(
            resolve("./p!./res", Some("foo/bar"), &cfg).unwrap(),
            "foo/p!./res"
        );
    }

    #[test]
    fn map_prefers_exact_context_over_ancestor() {
        let cfg = config(
            ConfigUpdate::new()
                .map_rule("foo", "jquery", "ancestor/jquery")
                .map_rule("foo/bar", "jquery", "exact/jquery"),
        );
        assert_eq!(
            resolve("jquery", Some("foo/bar"), &cfg).unwrap(),
            "exact/jquery"
        );
    }

    #[test]
    fn map_prefers_longest_ancestor_prefix() {
        let cfg = config(
            ConfigUpdate::new()
                .map_rule("foo", "jquery", "short/jquery")
                .map_rule("foo/bar", "jquery", "long/jquery")
                .map_rule("*", "jquery", "star/jquery"),
        );
        assert_eq!(
            resolve("jquery", Some("foo/bar/baz"), &cfg).unwrap(),
            "long/jquery"
        );
    }

    #[test]
    fn map_falls_back_to_star() {
        let cfg = config(ConfigUpdate::new().map_rule("*", "jquery", "dada/jquery"));
        assert_eq!(
            resolve("jquery", Some("foo/bar"), &cfg).unwrap(),
            "dada/jquery"
        );
        assert_eq!(resolve("jquery", None, &cfg).unwrap(), "dada/jquery");
    }

    #[test]
    fn map_falls_through_patterns_missing_the_requested_id() {
        let cfg = config(
            ConfigUpdate::new()
                .map_rule("foo/bar", "other", "x/other")
                .map_rule("foo", "jquery", "dada/jquery"),
        );
        assert_eq!(
            resolve("jquery", Some("foo/bar"), &cfg).unwrap(),
            "dada/jquery"
        );
    }

    #[test]
    fn map_substitution_is_not_chained() {
        let cfg = config(
            ConfigUpdate::new()
                .map_rule("*", "a", "b")
                .map_rule("*", "b", "c"),
        );
        assert_eq!(resolve("a", Some("m"), &cfg).unwrap(), "b");
    }

    #[test]
    fn packages_rewrite_to_their_main_module() {
        let cfg = config(ConfigUpdate::new().package("dada"));
        assert_eq!(resolve("dada", None, &cfg).unwrap(), "dada/main");
        assert_eq!(resolve("dada/foo", None, &cfg).unwrap(), "dada/foo");
    }

    #[test]
    fn package_descriptor_overrides_location_and_main() {
        let cfg = config(
            ConfigUpdate::new()
                .package(PackageDescriptor::new("dada").with_location("lib/dada").with_main("index")),
        );
        assert_eq!(resolve("dada", None, &cfg).unwrap(), "lib/dada/index");
        assert_eq!(resolve("dada/util", None, &cfg).unwrap(), "lib/dada/util");
    }

    #[test]
    fn paths_apply_the_longest_matching_prefix() {
        let cfg = config(
            ConfigUpdate::new()
                .path("a", "x")
                .path("a/b", "y"),
        );
        assert_eq!(resolve("a/c", None, &cfg).unwrap(), "x/c");
        assert_eq!(resolve("a/b/c", None, &cfg).unwrap(), "y/c");
        assert_eq!(resolve("ab/c", None, &cfg).unwrap(), "ab/c");
    }

    #[test]
    fn more_specific_path_shadows_package_rewrite() {
        let cfg = config(
            ConfigUpdate::new()
                .package("dada")
                .path("dada/special", "elsewhere/special"),
        );
        assert_eq!(resolve("dada/special/x", None, &cfg).unwrap(), "elsewhere/special/x");
        assert_eq!(resolve("dada", None, &cfg).unwrap(), "dada/main");
    }

    #[test]
    fn map_applies_before_paths() {
        let cfg = config(
            ConfigUpdate::new()
                .path("jquery", "jquery/not/here")
                .map_rule("*", "jquery", "dada/jquery"),
        );
        assert_eq!(resolve("jquery", Some("m"), &cfg).unwrap(), "dada/jquery");
    }

    #[test]
    fn join_url_handles_slashes_and_protocols() {
        assert_eq!(join_url("a/b", ""), "a/b");
        assert_eq!(join_url("a/b", "js"), "js/a/b");
        assert_eq!(join_url("a/b", "js/"), "js/a/b");
        assert_eq!(join_url("/abs/a", "js/"), "/abs/a");
        assert_eq!(join_url("http://cdn/x", "js/"), "http://cdn/x");
    }
}
