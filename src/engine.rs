// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The resolution engine: drives module records through their lifecycle and
//! notifies waiters.
//!
//! All engine state lives behind one mutex so multi-record transitions are
//! atomic. The lock is never held across user code: factories, require
//! callbacks, plugin `load` calls, and host evaluation all run with the
//! lock released, and re-enter through the public surface.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::config::{Config, ConfigUpdate, ShimSpec};
use crate::error::{AmdError, Result};
use crate::host::{FetchComplete, ScriptHost, SourceFetcher};
use crate::plugin::OnLoad;
use crate::registry::{Definition, ModuleState, Registry};
use crate::resolver::{self, Dependency, Special};
use crate::value::{ModuleInfo, Value};

/// Callback for the asynchronous multi-id require form. Receives the
/// requested exports positionally, or the error that failed the request.
pub type RequireCallback = Box<dyn FnOnce(Result<Vec<Value>>) + Send>;

/// One pending multi-id require: the exact ordered dependency list and the
/// continuation to resume once every listed id is ready.
struct Waiter {
    deps: Vec<Dependency>,
    context: Option<String>,
    callback: RequireCallback,
}

#[derive(Default)]
struct State {
    config: Config,
    registry: Registry,
    waiters: Vec<Waiter>,
    /// Ids whose fetched source is currently being evaluated; anonymous
    /// defines bind to the innermost one.
    evaluating: Vec<String>,
    /// Ids currently being satisfied or executed; a dependency found on
    /// this stack is a cycle member and receives interim exports.
    satisfying: Vec<String>,
    /// Bumped by reset; stale completion handles are ignored.
    epoch: u64,
}

pub(crate) struct Inner {
    state: Mutex<State>,
    fetcher: RwLock<Option<Arc<dyn SourceFetcher>>>,
    host: RwLock<Option<Arc<dyn ScriptHost>>>,
}

/// The top-level loader: the process-wide `define` / `require` /
/// `require.config` surface, minus any true global. Construct one instance
/// per independent resolution session.
#[derive(Clone)]
pub struct Loader {
    inner: Arc<Inner>,
}

impl Loader {
    /// A fresh loader with empty configuration and no collaborators.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                fetcher: RwLock::new(None),
                host: RwLock::new(None),
            }),
        }
    }

    /// Install the source transport used for ids that are required before
    /// being defined. Without one, such ids stay pending.
    pub fn set_fetcher(&self, fetcher: Arc<dyn SourceFetcher>) {
        *self.inner.fetcher.write() = Some(fetcher);
    }

    /// Install the evaluation sandbox that executes fetched source.
    pub fn set_host(&self, host: Arc<dyn ScriptHost>) {
        *self.inner.host.write() = Some(host);
    }

    /// The require bound to no module context.
    pub fn global_require(&self) -> Require {
        Require {
            inner: self.inner.clone(),
            context: None,
        }
    }

    /// Register a factory module under `id` with the given dependency ids.
    ///
    /// The id and dependencies are normalized immediately against the
    /// current configuration. Re-defining an id that already carries a
    /// definition is an error; the existing definition stands.
    pub fn define<F>(&self, id: &str, deps: &[&str], factory: F) -> Result<()>
    where
        F: FnOnce(&[Value]) -> anyhow::Result<Value> + Send + 'static,
    {
        Inner::define(
            &self.inner,
            Some(id),
            deps,
            Definition::Factory(Box::new(factory)),
        )
    }

    /// Register a constant module: `value` is the export, no factory runs.
    pub fn define_value(&self, id: &str, value: Value) -> Result<()> {
        Inner::define(&self.inner, Some(id), &[], Definition::Value(value))
    }

    /// Register an anonymous module. Only legal while fetched source is
    /// being evaluated; the id is taken from the module being fetched.
    pub fn define_anonymous<F>(&self, deps: &[&str], factory: F) -> Result<()>
    where
        F: FnOnce(&[Value]) -> anyhow::Result<Value> + Send + 'static,
    {
        Inner::define(&self.inner, None, deps, Definition::Factory(Box::new(factory)))
    }

    /// Asynchronous require: `callback` runs once every id is ready, with
    /// exports in request order, or with the first error that failed the
    /// request. All-or-nothing; no partial delivery.
    pub fn require<F>(&self, ids: &[&str], callback: F)
    where
        F: FnOnce(Result<Vec<Value>>) + Send + 'static,
    {
        Inner::require_many(&self.inner, ids, None, Box::new(callback));
    }

    /// Synchronous require: drives `id` as far as possible without waiting
    /// on pending I/O and returns its export, or `NotYetDefined`.
    pub fn require_one(&self, id: &str) -> Result<Value> {
        Inner::require_sync(&self.inner, id, None)
    }

    /// Merge a configuration update, then require any global `deps` it
    /// added.
    pub fn config(&self, update: ConfigUpdate) {
        Inner::apply_config(&self.inner, update);
    }

    /// Merge a configuration update given as a JSON blob.
    pub fn config_json(&self, json: &str) -> Result<()> {
        let update = ConfigUpdate::from_json(json)?;
        self.config(update);
        Ok(())
    }

    /// Resolve `id` and join it onto the configured base URL.
    pub fn to_url(&self, id: &str) -> Result<String> {
        Inner::to_url(&self.inner, id, None)
    }

    /// The lifecycle state of a module id, if the registry knows it.
    pub fn module_state(&self, id: &str) -> Option<ModuleState> {
        let st = self.inner.state.lock();
        let resolved = resolver::resolve(id, None, &st.config).ok()?;
        st.registry.state(&resolved)
    }

    /// Number of known module records.
    pub fn module_count(&self) -> usize {
        self.inner.state.lock().registry.len()
    }

    /// Discard all registry, waiter, and configuration state. The only way
    /// to abandon in-flight work; completion handles created before the
    /// reset are ignored when they fire.
    pub fn reset(&self) {
        let mut st = self.inner.state.lock();
        let epoch = st.epoch + 1;
        *st = State {
            epoch,
            ..State::default()
        };
        debug!("loader state reset");
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

/// A require function bound to the identity of the module that obtained it.
///
/// Relative ids resolve against the bound module's directory; `to_url` and
/// `config_value` read the same binding. The global require has no context.
#[derive(Clone)]
pub struct Require {
    pub(crate) inner: Arc<Inner>,
    pub(crate) context: Option<String>,
}

impl Require {
    /// The id of the module this require is bound to, if any.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Asynchronous multi-id require; ids resolve against this context.
    pub fn require<F>(&self, ids: &[&str], callback: F)
    where
        F: FnOnce(Result<Vec<Value>>) + Send + 'static,
    {
        Inner::require_many(&self.inner, ids, self.context(), Box::new(callback));
    }

    /// Synchronous single-id require against this context.
    pub fn require_one(&self, id: &str) -> Result<Value> {
        Inner::require_sync(&self.inner, id, self.context())
    }

    /// Resolve `id` against this context and join the configured base URL.
    pub fn to_url(&self, id: &str) -> Result<String> {
        Inner::to_url(&self.inner, id, self.context())
    }

    /// The exact configured value for the bound module id, identity
    /// preserved. `None` for the global require or an unconfigured id.
    pub fn config_value(&self) -> Option<Value> {
        let context = self.context.as_ref()?;
        let st = self.inner.state.lock();
        st.config.config_for(context).cloned()
    }

    pub(crate) fn same_instance(&self, other: &Require) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) && self.context == other.context
    }
}

impl Inner {
    // ----- define ---------------------------------------------------------

    pub(crate) fn define(
        self: &Arc<Self>,
        id: Option<&str>,
        deps: &[&str],
        definition: Definition,
    ) -> Result<()> {
        let (id, demanded) = {
            let mut st = self.state.lock();
            let id = match id {
                Some(raw) => resolver::resolve(raw, None, &st.config)?,
                None => st.evaluating.last().cloned().ok_or_else(|| {
                    AmdError::Config("anonymous define outside module evaluation".into())
                })?,
            };
            let mut dep_list = Vec::with_capacity(deps.len());
            for raw in deps {
                dep_list.push(resolver::classify(raw, Some(&id), &st.config)?);
            }
            let record = st.registry.get_or_create(&id);
            match record.state {
                ModuleState::Requested | ModuleState::Fetching => {}
                _ => {
                    warn!("rejecting duplicate definition of '{}'", id);
                    return Err(AmdError::DuplicateDefinition(id));
                }
            }
            record.deps = dep_list;
            record.definition = Some(definition);
            record.state = ModuleState::DefinedPending;
            debug!("defined module '{}'", id);
            (id, record.demanded)
        };
        if demanded {
            self.try_execute(&id);
        }
        Ok(())
    }

    // ----- require --------------------------------------------------------

    pub(crate) fn require_many(
        self: &Arc<Self>,
        ids: &[&str],
        context: Option<&str>,
        callback: RequireCallback,
    ) {
        let classified: Result<Vec<Dependency>> = {
            let st = self.state.lock();
            ids.iter()
                .map(|raw| resolver::classify(raw, context, &st.config))
                .collect()
        };
        let deps = match classified {
            Ok(deps) => deps,
            Err(e) => {
                callback(Err(e));
                return;
            }
        };
        trace!("require({:?}) in context {:?}", ids, context);
        for dep in &deps {
            self.ensure(dep, context);
        }
        self.state.lock().waiters.push(Waiter {
            deps,
            context: context.map(str::to_string),
            callback,
        });
        self.settle_waiters();
    }

    pub(crate) fn require_sync(
        self: &Arc<Self>,
        raw: &str,
        context: Option<&str>,
    ) -> Result<Value> {
        let dep = {
            let st = self.state.lock();
            resolver::classify(raw, context, &st.config)?
        };
        let key = match &dep {
            Dependency::Special(Special::Require) => {
                return Ok(Value::Require(Require {
                    inner: self.clone(),
                    context: context.map(str::to_string),
                }));
            }
            Dependency::Special(_) => return Ok(Value::Undefined),
            Dependency::Plain(id) => id.clone(),
            Dependency::Plugin { plugin, resource } => format!("{plugin}!{resource}"),
        };
        self.ensure(&dep, context);

        let mut st = self.state.lock();
        let in_cycle = st.satisfying.iter().any(|s| *s == key);
        let Some(record) = st.registry.get_mut(&key) else {
            return Err(AmdError::NotYetDefined(key));
        };
        match record.state {
            ModuleState::Ready => Ok(record.exports.clone().unwrap_or(Value::Undefined)),
            ModuleState::Failed => Err(record
                .error
                .clone()
                .unwrap_or_else(|| AmdError::NotYetDefined(key.clone()))),
            // A circular dependent sees the in-progress exports object.
            ModuleState::Executing => Ok(record.interim_exports()),
            _ if in_cycle => Ok(record.interim_exports()),
            _ => Err(AmdError::NotYetDefined(key.clone())),
        }
    }

    // ----- configuration --------------------------------------------------

    pub(crate) fn apply_config(self: &Arc<Self>, update: ConfigUpdate) {
        let added = {
            let mut st = self.state.lock();
            st.config.merge(update)
        };
        if !added.is_empty() {
            debug!("requiring global deps {:?}", added);
            let refs: Vec<&str> = added.iter().map(String::as_str).collect();
            self.require_many(
                &refs,
                None,
                Box::new(|result| {
                    if let Err(e) = result {
                        warn!("global deps failed: {}", e);
                    }
                }),
            );
        }
    }

    pub(crate) fn to_url(self: &Arc<Self>, raw: &str, context: Option<&str>) -> Result<String> {
        let st = self.state.lock();
        let resolved = resolver::resolve(raw, context, &st.config)?;
        Ok(resolver::join_url(&resolved, &st.config.base_url))
    }

    // ----- driving records ------------------------------------------------

    /// Drive one dependency toward ready: start a fetch for an unknown
    /// plain id, kick off the plugin protocol for a plugin id, or retry
    /// execution for a defined one. Settled and in-flight records are left
    /// alone, so a concurrent request attaches instead of re-fetching.
    fn ensure(self: &Arc<Self>, dep: &Dependency, requester: Option<&str>) {
        match dep {
            Dependency::Special(_) => {}
            Dependency::Plain(id) => self.ensure_plain(id),
            Dependency::Plugin { plugin, resource } => {
                self.ensure_plugin(plugin, resource, requester)
            }
        }
    }

    fn ensure_plain(self: &Arc<Self>, id: &str) {
        enum Action {
            None,
            Execute,
            Fetch { url: String, epoch: u64 },
        }
        let fetcher = self.fetcher.read().clone();
        let action = {
            let mut st = self.state.lock();
            let epoch = st.epoch;
            let base_url = st.config.base_url.clone();
            let record = st.registry.get_or_create(id);
            record.demanded = true;
            match record.state {
                ModuleState::DefinedPending => Action::Execute,
                ModuleState::Requested => {
                    if fetcher.is_some() {
                        record.state = ModuleState::Fetching;
                        Action::Fetch {
                            url: resolver::join_url(id, &base_url),
                            epoch,
                        }
                    } else {
                        // No transport; the id stays requested until a
                        // definition arrives.
                        trace!("no fetcher installed; '{}' stays pending", id);
                        Action::None
                    }
                }
                _ => Action::None,
            }
        };
        match action {
            Action::None => {}
            Action::Execute => self.try_execute(id),
            Action::Fetch { url, epoch } => {
                debug!("fetching '{}' from {}", id, url);
                if let Some(fetcher) = fetcher {
                    fetcher.fetch_source(
                        &url,
                        FetchComplete::new(self.clone(), id.to_string(), url.clone(), epoch),
                    );
                }
            }
        }
    }

    fn ensure_plugin(self: &Arc<Self>, plugin: &str, resource: &str, requester: Option<&str>) {
        let key = format!("{plugin}!{resource}");
        {
            let mut st = self.state.lock();
            let record = st.registry.get_or_create(&key);
            record.demanded = true;
            if record.state != ModuleState::Requested {
                return;
            }
            // The plugin owns production of this resource from here on.
            record.state = ModuleState::Fetching;
        }

        let this = self.clone();
        let plugin_id = plugin.to_string();
        let resource = resource.to_string();
        let requester = requester.map(str::to_string);
        let resource_key = key;
        self.require_many(
            &[plugin],
            None,
            Box::new(move |result| match result {
                Err(e) => this.finish_module(
                    &resource_key,
                    Err(AmdError::module_load(&resource_key, anyhow::Error::new(e))),
                ),
                Ok(values) => {
                    let export = values.into_iter().next().unwrap_or(Value::Undefined);
                    match export.as_plugin() {
                        None => this
                            .finish_module(&resource_key, Err(AmdError::PluginContract(plugin_id))),
                        Some(plugin) => {
                            let (config, epoch) = {
                                let st = this.state.lock();
                                (st.config.config_for(&plugin_id).cloned(), st.epoch)
                            };
                            trace!("delegating '{}' to plugin '{}'", resource_key, plugin_id);
                            let require = Require {
                                inner: this.clone(),
                                context: requester,
                            };
                            let on_load = OnLoad::new(this.clone(), resource_key, epoch);
                            plugin.load(&resource, require, on_load, config);
                        }
                    }
                }
            }),
        );
    }

    /// Attempt to execute `id`'s factory: satisfy its dependencies, and run
    /// the factory once they are all ready. Cycle members found on the
    /// satisfying stack are treated as satisfied and receive interim
    /// exports. Returns quietly when dependencies are still pending; the
    /// dependent edges registered here retry execution as they settle.
    fn try_execute(self: &Arc<Self>, id: &str) {
        {
            let mut st = self.state.lock();
            if st.satisfying.iter().any(|s| s == id) {
                return;
            }
            if st.registry.state(id) != Some(ModuleState::DefinedPending) {
                return;
            }
            st.satisfying.push(id.to_string());
        }
        self.satisfy_and_execute(id);
        let mut st = self.state.lock();
        if let Some(pos) = st.satisfying.iter().rposition(|s| s == id) {
            st.satisfying.remove(pos);
        }
    }

    fn satisfy_and_execute(self: &Arc<Self>, id: &str) {
        // Pass 1: find dependencies needing work; register retry edges.
        let missing: Vec<Dependency> = {
            let mut st = self.state.lock();
            let Some(record) = st.registry.get(id) else {
                return;
            };
            let deps = record.deps.clone();
            let mut missing = Vec::new();
            for dep in &deps {
                let Some(key) = dep.key() else { continue };
                let satisfied = match st.registry.state(&key) {
                    Some(ModuleState::Ready)
                    | Some(ModuleState::Failed)
                    | Some(ModuleState::Executing) => true,
                    _ => st.satisfying.iter().any(|s| *s == key),
                };
                if !satisfied {
                    st.registry.add_dependent(&key, id);
                    missing.push(dep.clone());
                }
            }
            missing
        };
        for dep in &missing {
            self.ensure(dep, Some(id));
        }

        // Pass 2: re-check; execute only if everything settled meanwhile.
        let (definition, args) = {
            let mut st = self.state.lock();
            if st.registry.state(id) != Some(ModuleState::DefinedPending) {
                return;
            }
            let deps = st
                .registry
                .get(id)
                .map(|r| r.deps.clone())
                .unwrap_or_default();

            let mut failed: Option<AmdError> = None;
            let mut pending = false;
            for dep in &deps {
                let Some(key) = dep.key() else { continue };
                match st.registry.state(&key) {
                    Some(ModuleState::Ready) | Some(ModuleState::Executing) => {}
                    Some(ModuleState::Failed) => {
                        failed = Some(
                            st.registry
                                .get(&key)
                                .and_then(|r| r.error.clone())
                                .unwrap_or_else(|| AmdError::NotYetDefined(key.clone())),
                        );
                        break;
                    }
                    _ if st.satisfying.iter().any(|s| *s == key) => {}
                    _ => pending = true,
                }
            }
            if let Some(cause) = failed {
                drop(st);
                self.finish_module(id, Err(AmdError::module_load(id, anyhow::Error::new(cause))));
                return;
            }
            if pending {
                // Retried via the dependent edges when the blockers settle.
                return;
            }

            let mut args = Vec::with_capacity(deps.len());
            for dep in &deps {
                let value = self.dep_value(&mut st, dep, id);
                args.push(value);
            }
            let Some(record) = st.registry.get_mut(id) else {
                return;
            };
            let Some(definition) = record.definition.take() else {
                return;
            };
            record.state = ModuleState::Executing;
            (definition, args)
        };

        trace!("executing module '{}'", id);
        let result = match definition {
            Definition::Value(value) => Ok(value),
            Definition::Factory(factory) => factory(&args),
        };
        let outcome = match result {
            Ok(value) => {
                let export = if value.is_undefined() {
                    // An explicit return wins; otherwise the injected
                    // exports object (when one was created) is the export.
                    let st = self.state.lock();
                    st.registry
                        .get(id)
                        .and_then(|r| r.exports_obj.clone())
                        .unwrap_or(Value::Undefined)
                } else {
                    value
                };
                Ok(export)
            }
            Err(e) => Err(AmdError::module_load(id, e)),
        };
        self.finish_module(id, outcome);
    }

    /// The value delivered to a factory for one declared dependency.
    fn dep_value(self: &Arc<Self>, st: &mut State, dep: &Dependency, module_id: &str) -> Value {
        match dep {
            Dependency::Special(Special::Require) => Value::Require(Require {
                inner: self.clone(),
                context: Some(module_id.to_string()),
            }),
            Dependency::Special(Special::Exports) => st
                .registry
                .get_mut(module_id)
                .map(|r| r.interim_exports())
                .unwrap_or(Value::Undefined),
            Dependency::Special(Special::Module) => {
                let config = st.config.config_for(module_id).cloned();
                Value::Module(Arc::new(ModuleInfo::new(module_id, config)))
            }
            Dependency::Plain(key) => Self::export_or_interim(st, key),
            Dependency::Plugin { .. } => match dep.key() {
                Some(key) => Self::export_or_interim(st, &key),
                None => Value::Undefined,
            },
        }
    }

    fn export_or_interim(st: &mut State, key: &str) -> Value {
        match st.registry.get_mut(key) {
            None => Value::Undefined,
            Some(record) => match record.state {
                ModuleState::Ready => record.exports.clone().unwrap_or(Value::Undefined),
                // Cycle member: hand out the not-yet-finalized exports.
                _ => record.interim_exports(),
            },
        }
    }

    /// Transition `id` to its absorbing state, then retry dependents and
    /// settle waiters. Idempotent: a record settles at most once.
    pub(crate) fn finish_module(self: &Arc<Self>, id: &str, result: Result<Value>) {
        let dependents = {
            let mut st = self.state.lock();
            let Some(record) = st.registry.get_mut(id) else {
                return;
            };
            if record.is_settled() {
                return;
            }
            match result {
                Ok(value) => {
                    debug!("module '{}' is ready", id);
                    record.state = ModuleState::Ready;
                    record.exports = Some(value);
                }
                Err(e) => {
                    warn!("module '{}' failed: {}", id, e);
                    record.state = ModuleState::Failed;
                    record.error = Some(e);
                }
            }
            st.registry.take_dependents(id)
        };
        for dependent in dependents {
            self.try_execute(&dependent);
        }
        self.settle_waiters();
    }

    pub(crate) fn finish_external(
        self: &Arc<Self>,
        epoch: u64,
        id: &str,
        result: std::result::Result<Value, anyhow::Error>,
    ) {
        {
            let st = self.state.lock();
            if st.epoch != epoch {
                trace!("ignoring stale completion for '{}'", id);
                return;
            }
        }
        let mapped = result.map_err(|e| AmdError::module_load(id, e));
        self.finish_module(id, mapped);
    }

    // ----- fetch completion ----------------------------------------------

    pub(crate) fn fetch_delivered(
        self: &Arc<Self>,
        id: String,
        url: String,
        epoch: u64,
        result: anyhow::Result<String>,
    ) {
        {
            let st = self.state.lock();
            if st.epoch != epoch {
                trace!("ignoring stale fetch for '{}'", id);
                return;
            }
        }
        let source = match result {
            Ok(source) => source,
            Err(e) => {
                self.finish_module(&id, Err(AmdError::module_load(&id, e)));
                return;
            }
        };
        let Some(host) = self.host.read().clone() else {
            self.finish_module(
                &id,
                Err(AmdError::module_load(
                    &id,
                    anyhow::anyhow!("no script host installed to evaluate {}", url),
                )),
            );
            return;
        };

        self.state.lock().evaluating.push(id.clone());
        let evaluated = host.evaluate(&source, &url);
        {
            let mut st = self.state.lock();
            if st.epoch != epoch {
                return;
            }
            if let Some(pos) = st.evaluating.iter().rposition(|s| *s == id) {
                st.evaluating.remove(pos);
            }
        }
        if let Err(e) = evaluated {
            self.finish_module(&id, Err(AmdError::module_load(&id, e)));
            return;
        }

        // Evaluation normally calls define, which drives the record onward.
        // A script that defined nothing is either shimmed or an error.
        enum After {
            Done,
            Shim(ShimSpec),
            Undefined,
        }
        let after = {
            let st = self.state.lock();
            match st.registry.state(&id) {
                Some(ModuleState::Fetching) => match st.config.shim.get(&id) {
                    Some(shim) => After::Shim(shim.clone()),
                    None => After::Undefined,
                },
                _ => After::Done,
            }
        };
        match after {
            After::Done => {}
            After::Undefined => self.finish_module(
                &id,
                Err(AmdError::module_load(
                    &id,
                    anyhow::anyhow!("evaluating {} did not define module '{}'", url, id),
                )),
            ),
            After::Shim(shim) => {
                debug!("applying shim for '{}'", id);
                let export_name = shim.exports.clone();
                let shim_host = host.clone();
                let dep_refs: Vec<&str> = shim.deps.iter().map(String::as_str).collect();
                let defined = self.define(
                    Some(&id),
                    &dep_refs,
                    Definition::Factory(Box::new(move |_deps| {
                        Ok(match &export_name {
                            Some(name) => shim_host.global(name).unwrap_or(Value::Undefined),
                            None => Value::Undefined,
                        })
                    })),
                );
                if let Err(e) = defined {
                    self.finish_module(&id, Err(AmdError::module_load(&id, anyhow::Error::new(e))));
                }
            }
        }
    }

    // ----- waiters --------------------------------------------------------

    /// Fire every waiter whose id list is fully settled. Callbacks run with
    /// the lock released and may register further definitions or waiters;
    /// the scan repeats until it reaches a fixed point.
    fn settle_waiters(self: &Arc<Self>) {
        loop {
            enum Status {
                Pending,
                Ready,
                Failed(AmdError),
            }
            let fired: Vec<(RequireCallback, Result<Vec<Value>>)> = {
                let mut st = self.state.lock();
                let mut fired = Vec::new();
                let mut idx = 0;
                while idx < st.waiters.len() {
                    let status = {
                        let waiter = &st.waiters[idx];
                        let mut status = Status::Ready;
                        for dep in &waiter.deps {
                            let Some(key) = dep.key() else { continue };
                            match st.registry.state(&key) {
                                Some(ModuleState::Ready) => {}
                                Some(ModuleState::Failed) => {
                                    status = Status::Failed(
                                        st.registry
                                            .get(&key)
                                            .and_then(|r| r.error.clone())
                                            .unwrap_or_else(|| AmdError::NotYetDefined(key)),
                                    );
                                    break;
                                }
                                _ => {
                                    status = Status::Pending;
                                    break;
                                }
                            }
                        }
                        status
                    };
                    match status {
                        Status::Pending => idx += 1,
                        Status::Ready => {
                            let waiter = st.waiters.remove(idx);
                            let values = waiter
                                .deps
                                .iter()
                                .map(|dep| self.waiter_value(&st, dep, &waiter.context))
                                .collect();
                            fired.push((waiter.callback, Ok(values)));
                        }
                        Status::Failed(e) => {
                            let waiter = st.waiters.remove(idx);
                            fired.push((waiter.callback, Err(e)));
                        }
                    }
                }
                fired
            };
            if fired.is_empty() {
                return;
            }
            for (callback, result) in fired {
                callback(result);
            }
        }
    }

    /// The value delivered to a require callback for one requested id.
    /// `exports` and `module` are only meaningful inside a define body, so
    /// a require callback sees them as undefined.
    fn waiter_value(self: &Arc<Self>, st: &State, dep: &Dependency, context: &Option<String>) -> Value {
        match dep {
            Dependency::Special(Special::Require) => Value::Require(Require {
                inner: self.clone(),
                context: context.clone(),
            }),
            Dependency::Special(_) => Value::Undefined,
            _ => dep
                .key()
                .and_then(|key| st.registry.get(&key))
                .and_then(|record| record.exports.clone())
                .unwrap_or(Value::Undefined),
        }
    }
}
