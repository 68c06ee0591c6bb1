//! Plugin lifecycle management.
//!
//! [`PluginManager`] is the single owner of every plugin instance. It:
//!
//! - Enumerates a [`PluginSource`], skipping disabled, live, invalid and
//!   API-incompatible descriptors.
//! - Resolves the declared `(id, semver requirement)` dependencies of a
//!   batch **before** touching anything: a missing or mismatched dependency,
//!   or a cycle, fails the whole batch with
//!   [`PluginError::DependencyUnsatisfied`].
//! - Brings the batch up in dependency order, in two phases:
//!
//! ```text
//!   phase 1: on_load  (A, B, C …)   ──▶ Loaded
//!   phase 2: on_start (A, B, C …)   ──▶ Started, listeners subscribed
//!   command tree rebuilt, PLUGIN_LOADED published
//! ```
//!
//! - Tears plugins down in reverse order: `on_unload`, then every listener,
//!   command and help entry the plugin registered is removed.
//! - Serializes every lifecycle operation behind one async mutex. An
//!   operation requested from inside a lifecycle hook fails with
//!   [`PluginError::ReentrantLifecycle`].
//!
//! Hook errors and panics are caught per plugin: the plugin is marked
//! [`PluginState::Failed`], its registrations are dropped, plugins that
//! depend on it are failed too, and everything else continues.
//!
//! # Example
//!
//! ```rust,ignore
//! use hearth_framework::manager::PluginManager;
//! use hearth_framework::plugin::LinkedPlugins;
//!
//! let manager = Arc::new(PluginManager::new(bus.clone(), HashMap::new()));
//! manager.load_all(Arc::new(LinkedPlugins)).await?;
//! // …later…
//! manager.reload("backup").await?;
//! manager.unload_all().await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use hearth_core::{
    BoxError, BoxedEvent, DispatchMode, Event, EventBus, EventKind, PermissionLevel,
    panic_message,
};
use parking_lot::RwLock;
use semver::Version;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::command::{CommandRoot, CommandTree};
use crate::error::{PluginError, PluginResult};
use crate::plugin::{
    HOST_ID, HelpMessage, Plugin, PluginContext, PluginDescriptor, PluginMetadata, PluginSource,
    PluginState, host_version, is_valid_plugin_id, visible_help,
};
use crate::server::ServerControl;

tokio::task_local! {
    /// Set while a lifecycle hook runs.
    static LIFECYCLE_HOOK: ();
}

// =============================================================================
// Topological sort utility
// =============================================================================

/// Computes the load order of a batch as **layers** via Kahn's algorithm.
///
/// An edge **A → B** means "A must load before B"; only dependencies on
/// other members of the batch create edges. Unload order is obtained by
/// reversing the layers.
///
/// # Errors
///
/// Returns the indices of the plugins left on a cycle.
fn topological_layers(batch: &[Candidate]) -> Result<Vec<Vec<usize>>, Vec<usize>> {
    let n = batch.len();
    let index: HashMap<&str, usize> = batch
        .iter()
        .enumerate()
        .map(|(i, c)| (c.metadata.id.as_str(), i))
        .collect();

    let mut in_degree: Vec<usize> = vec![0; n];
    let mut dependents: Vec<Vec<usize>> = vec![vec![]; n];

    for (i, candidate) in batch.iter().enumerate() {
        for dep in &candidate.metadata.dependencies {
            if let Some(&provider) = index.get(dep.id.as_str()) {
                dependents[provider].push(i);
                in_degree[i] += 1;
            }
        }
    }

    let mut layers: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut processed = 0;

    while !current.is_empty() {
        processed += current.len();
        let mut next: Vec<usize> = Vec::new();
        for &i in &current {
            for &j in &dependents[i] {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    next.push(j);
                }
            }
        }
        layers.push(current);
        current = next;
    }

    if processed != n {
        return Err((0..n).filter(|&i| in_degree[i] > 0).collect());
    }

    Ok(layers)
}

/// Runs one hook with the reentrancy marker set, converting errors and
/// panics into [`PluginError::HookFailed`].
async fn run_hook<F>(id: &str, hook: &'static str, fut: F) -> PluginResult<()>
where
    F: Future<Output = Result<(), BoxError>>,
{
    match AssertUnwindSafe(LIFECYCLE_HOOK.scope((), fut))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(PluginError::hook(id, hook, err.to_string())),
        Err(payload) => Err(PluginError::hook(
            id,
            hook,
            format!("panicked: {}", panic_message(&*payload)),
        )),
    }
}

// =============================================================================
// Reports and events
// =============================================================================

/// What one lifecycle operation changed.
#[derive(Debug, Clone, Default)]
pub struct LifecycleReport {
    /// Plugins that reached [`PluginState::Started`], in load order.
    pub loaded: Vec<Arc<PluginMetadata>>,
    /// Plugins that were torn down, in unload order.
    pub unloaded: Vec<Arc<PluginMetadata>>,
    /// Plugins marked [`PluginState::Failed`], with the cause.
    pub failed: Vec<(String, PluginError)>,
}

impl LifecycleReport {
    pub fn loaded_ids(&self) -> Vec<&str> {
        self.loaded.iter().map(|m| m.id.as_str()).collect()
    }

    pub fn unloaded_ids(&self) -> Vec<&str> {
        self.unloaded.iter().map(|m| m.id.as_str()).collect()
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty() && self.unloaded.is_empty() && self.failed.is_empty()
    }
}

/// Published as [`EventKind::PLUGIN_LOADED`] and [`EventKind::PLUGIN_UNLOADED`].
#[derive(Debug, Clone)]
pub struct PluginEvent {
    pub metadata: Arc<PluginMetadata>,
}

impl PluginEvent {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }
}

impl Event for PluginEvent {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

// =============================================================================
// PluginEntry (internal)
// =============================================================================

#[derive(Clone)]
struct Candidate {
    descriptor: PluginDescriptor,
    metadata: Arc<PluginMetadata>,
}

impl Candidate {
    fn new(descriptor: PluginDescriptor) -> Self {
        Self {
            metadata: Arc::new(descriptor.metadata()),
            descriptor,
        }
    }
}

struct PluginEntry {
    descriptor: PluginDescriptor,
    metadata: Arc<PluginMetadata>,
    instance: Arc<dyn Plugin>,
    context: PluginContext,
}

impl PluginEntry {
    fn id(&self) -> &str {
        &self.metadata.id
    }

    fn state(&self) -> PluginState {
        self.context.state()
    }
}

// =============================================================================
// PluginManager
// =============================================================================

/// Central manager for plugin discovery, dependency resolution and lifecycle.
///
/// # Plugin configuration
///
/// `settings` maps a plugin id to its JSON section, taken from
/// `plugins.settings.<id>` of the runtime configuration. Plugins without a
/// section see `null`.
pub struct PluginManager {
    lifecycle: Mutex<()>,
    /// Every known plugin in load order; failed plugins stay listed.
    entries: RwLock<Vec<PluginEntry>>,
    settings: HashMap<String, Value>,
    disabled: RwLock<HashSet<String>>,
    /// The last source given to `load_all` or `refresh`.
    source: RwLock<Option<Arc<dyn PluginSource>>>,
    bus: Arc<EventBus>,
    tree: Arc<CommandTree>,
    server: RwLock<Option<Weak<dyn ServerControl>>>,
}

impl PluginManager {
    pub fn new(bus: Arc<EventBus>, settings: HashMap<String, Value>) -> Self {
        Self {
            lifecycle: Mutex::new(()),
            entries: RwLock::new(Vec::new()),
            settings,
            disabled: RwLock::new(HashSet::new()),
            source: RwLock::new(None),
            tree: Arc::new(CommandTree::new(bus.clone())),
            bus,
            server: RwLock::new(None),
        }
    }

    /// Seeds the disabled set.
    pub fn with_disabled(self, ids: impl IntoIterator<Item = String>) -> Self {
        self.disabled.write().extend(ids);
        self
    }

    /// Sets the server handle given to plugin contexts created from now on.
    pub fn attach_server(&self, server: Weak<dyn ServerControl>) {
        *self.server.write() = Some(server);
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn tree(&self) -> &Arc<CommandTree> {
        &self.tree
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    /// Every known plugin with its state, in load order.
    pub fn plugin_list(&self) -> Vec<(PluginMetadata, PluginState)> {
        self.entries
            .read()
            .iter()
            .map(|e| (PluginMetadata::clone(&e.metadata), e.state()))
            .collect()
    }

    pub fn plugin_state(&self, id: &str) -> Option<PluginState> {
        self.find(id, |e| e.state())
    }

    pub fn metadata(&self, id: &str) -> Option<Arc<PluginMetadata>> {
        self.find(id, |e| e.metadata.clone())
    }

    /// The live instance of a plugin, for downcasting.
    pub fn instance(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.find(id, |e| e.instance.clone())
    }

    pub fn is_disabled(&self, id: &str) -> bool {
        self.disabled.read().contains(id)
    }

    pub fn disabled(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.disabled.read().iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Help entries of started plugins visible to `level`, sorted by prefix.
    pub fn help_messages(&self, level: PermissionLevel) -> Vec<HelpMessage> {
        let messages: Vec<HelpMessage> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.state() == PluginState::Started)
            .flat_map(|e| e.context.help_messages())
            .collect();
        visible_help(messages, level)
    }

    fn find<T>(&self, id: &str, f: impl FnOnce(&PluginEntry) -> T) -> Option<T> {
        self.entries.read().iter().find(|e| e.id() == id).map(f)
    }

    fn is_live(&self, id: &str) -> bool {
        self.plugin_state(id).is_some_and(PluginState::is_live)
    }

    // ─── Lifecycle operations ────────────────────────────────────────────────

    /// Loads every eligible descriptor of `source` and remembers the source
    /// for [`enable`](Self::enable) and [`reload`](Self::reload).
    pub async fn load_all(&self, source: Arc<dyn PluginSource>) -> PluginResult<LifecycleReport> {
        let _guard = self.enter().await?;
        *self.source.write() = Some(source.clone());
        let batch = self.discover(source.as_ref(), &HashSet::new());
        let report = self.transition(Vec::new(), batch, false).await?;
        self.announce(&report).await;
        Ok(report)
    }

    /// Loads a single descriptor.
    pub async fn load(&self, descriptor: PluginDescriptor) -> PluginResult<LifecycleReport> {
        let _guard = self.enter().await?;
        self.check_loadable(&descriptor)?;
        let report = self.transition(Vec::new(), vec![descriptor], false).await?;
        self.announce(&report).await;
        Ok(report)
    }

    /// Unloads a plugin.
    ///
    /// Fails with [`PluginError::DependentsStillLoaded`] while another live
    /// plugin declares a dependency on it. A failed plugin is just removed.
    pub async fn unload(&self, id: &str) -> PluginResult<LifecycleReport> {
        let _guard = self.enter().await?;
        let report = self.unload_locked(id).await?;
        self.announce(&report).await;
        Ok(report)
    }

    /// Reloads a plugin and every plugin that transitively depends on it.
    ///
    /// Dependents unload first and start last. Each new instance receives
    /// the instance it replaces in `on_load`. The descriptor is looked up in
    /// the remembered source first, so a replaced descriptor takes effect.
    pub async fn reload(&self, id: &str) -> PluginResult<LifecycleReport> {
        let _guard = self.enter().await?;
        if self.plugin_state(id).is_none() {
            return Err(PluginError::NotLoaded(id.to_string()));
        }
        let closure = self.dependents_closure(&[id.to_string()]);
        let batch = closure
            .iter()
            .filter_map(|member| self.current_descriptor(member))
            .collect();
        let report = self.transition(closure, batch, true).await?;
        self.announce(&report).await;
        Ok(report)
    }

    /// Removes `id` from the disabled set and loads it from the remembered
    /// source. Enabling a live plugin does nothing.
    pub async fn enable(&self, id: &str) -> PluginResult<LifecycleReport> {
        let _guard = self.enter().await?;
        if self.disabled.write().remove(id) {
            info!(plugin = %id, "Plugin enabled");
        }
        if self.is_live(id) {
            return Ok(LifecycleReport::default());
        }
        let descriptor = self
            .source
            .read()
            .as_ref()
            .and_then(|source| source.find(id))
            .ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        self.check_loadable(&descriptor)?;
        let report = self.transition(Vec::new(), vec![descriptor], false).await?;
        self.announce(&report).await;
        Ok(report)
    }

    /// Adds `id` to the disabled set and unloads it if present.
    ///
    /// The set is left unchanged when the unload is refused.
    pub async fn disable(&self, id: &str) -> PluginResult<LifecycleReport> {
        let _guard = self.enter().await?;
        let inserted = self.disabled.write().insert(id.to_string());
        let report = if self.plugin_state(id).is_none() {
            LifecycleReport::default()
        } else {
            match self.unload_locked(id).await {
                Ok(report) => report,
                Err(err) => {
                    if inserted {
                        self.disabled.write().remove(id);
                    }
                    return Err(err);
                }
            }
        };
        info!(plugin = %id, "Plugin disabled");
        self.announce(&report).await;
        Ok(report)
    }

    /// Synchronizes with `source`: plugins that vanished from it are
    /// unloaded and new descriptors are loaded.
    ///
    /// Plugins depending on a vanished one are reloaded, which fails the
    /// whole refresh if their dependency is gone for good.
    pub async fn refresh(&self, source: Arc<dyn PluginSource>) -> PluginResult<LifecycleReport> {
        let _guard = self.enter().await?;
        let present: HashSet<&'static str> = source.descriptors().iter().map(|d| d.id).collect();
        let vanished: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|e| !present.contains(e.id()))
            .map(|e| e.id().to_string())
            .collect();

        let closure = self.dependents_closure(&vanished);
        let excluded: HashSet<String> = closure.iter().cloned().collect();
        let batch = self.discover(source.as_ref(), &excluded);

        *self.source.write() = Some(source);
        let report = self.transition(closure, batch, true).await?;
        self.announce(&report).await;
        Ok(report)
    }

    /// [`refresh`](Self::refresh) against the remembered source.
    pub async fn refresh_current(&self) -> PluginResult<LifecycleReport> {
        let source = self.source.read().clone().ok_or(PluginError::NoSource)?;
        self.refresh(source).await
    }

    /// Unloads every plugin in reverse load order, ignoring dependents.
    pub async fn unload_all(&self) -> PluginResult<LifecycleReport> {
        let _guard = self.enter().await?;
        let all: Vec<String> = self.entries.read().iter().map(|e| e.id().to_string()).collect();
        let mut report = LifecycleReport::default();
        self.take_down_all(&all, &mut report).await;
        self.announce(&report).await;
        Ok(report)
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    async fn enter(&self) -> PluginResult<MutexGuard<'_, ()>> {
        if LIFECYCLE_HOOK.try_with(|_| ()).is_ok() {
            return Err(PluginError::ReentrantLifecycle);
        }
        Ok(self.lifecycle.lock().await)
    }

    fn check_loadable(&self, descriptor: &PluginDescriptor) -> PluginResult<()> {
        let id = descriptor.id;
        if !is_valid_plugin_id(id) {
            return Err(PluginError::InvalidId(id.to_string()));
        }
        if !descriptor.is_compatible() {
            return Err(PluginError::IncompatibleApi {
                id: id.to_string(),
                version: descriptor.api_version_string(),
            });
        }
        if self.is_disabled(id) {
            return Err(PluginError::Disabled(id.to_string()));
        }
        if self.is_live(id) {
            return Err(PluginError::AlreadyLoaded(id.to_string()));
        }
        Ok(())
    }

    /// Eligible descriptors of `source`. Plugins in `replacing` count as
    /// not live.
    fn discover(
        &self,
        source: &dyn PluginSource,
        replacing: &HashSet<String>,
    ) -> Vec<PluginDescriptor> {
        let mut seen = HashSet::new();
        let mut batch = Vec::new();
        for descriptor in source.descriptors() {
            let id = descriptor.id;
            if !seen.insert(id) {
                warn!(plugin = id, "Duplicate plugin id, ignored");
                continue;
            }
            match self.check_loadable(&descriptor) {
                Ok(()) => batch.push(descriptor),
                Err(PluginError::AlreadyLoaded(_)) if replacing.contains(id) => {
                    batch.push(descriptor)
                }
                Err(err @ (PluginError::AlreadyLoaded(_) | PluginError::Disabled(_))) => {
                    debug!(plugin = id, reason = %err, "Plugin skipped");
                }
                Err(err) => warn!(plugin = id, error = %err, "Plugin skipped"),
            }
        }
        batch
    }

    /// The descriptor to use when `id` comes back up.
    fn current_descriptor(&self, id: &str) -> Option<PluginDescriptor> {
        let from_source = self
            .source
            .read()
            .as_ref()
            .and_then(|source| source.find(id));
        from_source.or_else(|| self.find(id, |e| e.descriptor))
    }

    /// `roots` plus every live plugin that transitively depends on them,
    /// in load order.
    fn dependents_closure(&self, roots: &[String]) -> Vec<String> {
        let entries = self.entries.read();
        let mut members: HashSet<&str> = roots.iter().map(String::as_str).collect();
        loop {
            let mut grew = false;
            for entry in entries.iter() {
                if !members.contains(entry.id())
                    && entry.state().is_live()
                    && entry
                        .metadata
                        .dependencies
                        .iter()
                        .any(|d| members.contains(d.id.as_str()))
                {
                    members.insert(entry.id());
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }
        entries
            .iter()
            .filter(|e| members.contains(e.id()))
            .map(|e| e.id().to_string())
            .collect()
    }

    async fn unload_locked(&self, id: &str) -> PluginResult<LifecycleReport> {
        let state = self
            .plugin_state(id)
            .ok_or_else(|| PluginError::NotLoaded(id.to_string()))?;
        if state.is_live() {
            let dependents: Vec<String> = self
                .entries
                .read()
                .iter()
                .filter(|e| e.state().is_live() && e.metadata.depends_on(id))
                .map(|e| e.id().to_string())
                .collect();
            if !dependents.is_empty() {
                return Err(PluginError::DependentsStillLoaded {
                    id: id.to_string(),
                    dependents,
                });
            }
        }
        self.transition(vec![id.to_string()], Vec::new(), false).await
    }

    /// Resolves `batch`, then tears down `teardown` (given in load order)
    /// and brings `batch` up.
    ///
    /// Nothing changes when resolution fails.
    async fn transition(
        &self,
        teardown: Vec<String>,
        batch: Vec<PluginDescriptor>,
        keep_previous: bool,
    ) -> PluginResult<LifecycleReport> {
        let excluded: HashSet<String> = teardown.iter().cloned().collect();
        let ordered = self.resolve(batch, &excluded)?;

        let mut report = LifecycleReport::default();
        let previous = self.take_down_all(&teardown, &mut report).await;
        let previous = if keep_previous { previous } else { HashMap::new() };
        self.bring_up(ordered, previous, &mut report).await;
        Ok(report)
    }

    /// Checks every dependency of `batch` and orders it.
    ///
    /// Providers are batch members, live plugins not in `excluded`, and the
    /// host itself under [`HOST_ID`].
    fn resolve(
        &self,
        batch: Vec<PluginDescriptor>,
        excluded: &HashSet<String>,
    ) -> PluginResult<Vec<Candidate>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let candidates: Vec<Candidate> = batch.into_iter().map(Candidate::new).collect();

        let live: HashMap<String, Version> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.state().is_live() && !excluded.contains(e.id()))
            .map(|e| (e.id().to_string(), e.metadata.version.clone()))
            .collect();
        let in_batch: HashMap<&str, &Version> = candidates
            .iter()
            .map(|c| (c.metadata.id.as_str(), &c.metadata.version))
            .collect();

        for candidate in &candidates {
            for dep in &candidate.metadata.dependencies {
                let found = in_batch
                    .get(dep.id.as_str())
                    .map(|v| (*v).clone())
                    .or_else(|| live.get(&dep.id).cloned())
                    .or_else(|| (dep.id == HOST_ID).then(host_version));
                match found {
                    None => {
                        return Err(PluginError::dependency(
                            &candidate.metadata.id,
                            format!("requires {dep}, which is not loaded"),
                        ));
                    }
                    Some(version) if !dep.is_satisfied_by(&version) => {
                        return Err(PluginError::dependency(
                            &candidate.metadata.id,
                            format!("requires {dep}, found {version}"),
                        ));
                    }
                    Some(_) => {}
                }
            }
        }

        let layers = topological_layers(&candidates).map_err(|cycle| {
            let ids: Vec<&str> = cycle
                .iter()
                .map(|&i| candidates[i].metadata.id.as_str())
                .collect();
            PluginError::dependency(
                ids.first().copied().unwrap_or_default(),
                format!("dependency cycle among: {}", ids.join(", ")),
            )
        })?;

        Ok(layers
            .into_iter()
            .flatten()
            .map(|i| candidates[i].clone())
            .collect())
    }

    async fn bring_up(
        &self,
        ordered: Vec<Candidate>,
        mut previous: HashMap<String, Arc<dyn Plugin>>,
        report: &mut LifecycleReport,
    ) {
        if ordered.is_empty() {
            return;
        }
        let server = self.server.read().clone();
        let mut failed: HashSet<String> = HashSet::new();
        let mut loaded: Vec<(Arc<PluginMetadata>, Arc<dyn Plugin>, PluginContext)> = Vec::new();

        // ── 1. on_load in dependency order ────────────────────────────────
        for candidate in ordered {
            let metadata = candidate.metadata;
            let id = metadata.id.clone();
            let config = self.settings.get(&id).cloned().unwrap_or(Value::Null);
            let context = PluginContext::new(
                metadata.clone(),
                Arc::new(config),
                self.bus.clone(),
                server.clone(),
            );
            let instance: Arc<dyn Plugin> = Arc::from(candidate.descriptor.instantiate());

            {
                let mut entries = self.entries.write();
                entries.retain(|e| e.id() != id);
                entries.push(PluginEntry {
                    descriptor: candidate.descriptor,
                    metadata: metadata.clone(),
                    instance: instance.clone(),
                    context: context.clone(),
                });
            }

            if let Some(dep) = metadata.dependencies.iter().find(|d| failed.contains(&d.id)) {
                let err = PluginError::dependency(&id, format!("dependency '{}' failed", dep.id));
                self.fail(&context, err, &mut failed, report);
                continue;
            }

            let hook = instance.on_load(&context, previous.remove(&id));
            let outcome = run_hook(&id, "on_load", hook).await;
            match outcome {
                Ok(()) => {
                    context.set_state(PluginState::Loaded);
                    debug!(plugin = %id, "Plugin loaded");
                    loaded.push((metadata, instance, context));
                }
                Err(err) => self.fail(&context, err, &mut failed, report),
            }
        }

        // ── 2. on_start, registrations go live ────────────────────────────
        for (metadata, instance, context) in loaded {
            let id = metadata.id.as_str();
            if let Some(dep) = metadata.dependencies.iter().find(|d| failed.contains(&d.id)) {
                let err = PluginError::dependency(id, format!("dependency '{}' failed", dep.id));
                self.fail(&context, err, &mut failed, report);
                continue;
            }

            let outcome = run_hook(id, "on_start", instance.on_start(&context)).await;
            match outcome {
                Ok(()) => {
                    let listeners = context.activate();
                    info!(
                        plugin = %id,
                        version = %metadata.version,
                        listeners,
                        commands = context.commands().len(),
                        "Plugin started"
                    );
                    report.loaded.push(metadata);
                }
                Err(err) => self.fail(&context, err, &mut failed, report),
            }
        }

        self.rebuild_tree();
    }

    fn fail(
        &self,
        context: &PluginContext,
        err: PluginError,
        failed: &mut HashSet<String>,
        report: &mut LifecycleReport,
    ) {
        let id = context.id().to_string();
        context.close(PluginState::Failed);
        error!(plugin = %id, error = %err, "Plugin failed");
        failed.insert(id.clone());
        report.failed.push((id, err));
    }

    /// Tears down `ids` (given in load order) in reverse. Returns the
    /// instances that were live.
    async fn take_down_all(
        &self,
        ids: &[String],
        report: &mut LifecycleReport,
    ) -> HashMap<String, Arc<dyn Plugin>> {
        let mut previous = HashMap::new();
        for id in ids.iter().rev() {
            let Some((metadata, instance, context)) = self.find(id, |e| {
                (e.metadata.clone(), e.instance.clone(), e.context.clone())
            }) else {
                continue;
            };

            let was_live = context.state().is_live();
            if was_live {
                context.set_state(PluginState::Unloading);
                if let Err(err) = run_hook(id, "on_unload", instance.on_unload(&context)).await {
                    warn!(plugin = %id, error = %err, "Plugin unload hook failed");
                }
            }
            let listeners = context.close(PluginState::Unloaded);
            self.entries.write().retain(|e| e.id() != id);

            if was_live {
                info!(plugin = %id, listeners, "Plugin unloaded");
                previous.insert(id.clone(), instance);
                report.unloaded.push(metadata);
            } else {
                debug!(plugin = %id, "Failed plugin removed");
            }
        }
        if !ids.is_empty() {
            self.rebuild_tree();
        }
        previous
    }

    /// Rebuilds the command tree from the roots of started plugins.
    fn rebuild_tree(&self) {
        let roots: Vec<CommandRoot> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.state() == PluginState::Started)
            .flat_map(|e| {
                let plugin: Arc<str> = Arc::from(e.id());
                e.context
                    .commands()
                    .into_iter()
                    .map(move |node| CommandRoot::new(plugin.clone(), node))
            })
            .collect();
        debug!(roots = roots.len(), "Command tree rebuilt");
        self.tree.rebuild(roots);
    }

    /// Publishes the plugin events of a finished operation.
    ///
    /// Runs under the lifecycle lock, so announcements keep operation order.
    /// A listener that wants to start a lifecycle operation in response must
    /// spawn it; awaiting it would hold the announcement until the watchdog.
    async fn announce(&self, report: &LifecycleReport) {
        let unloaded = report
            .unloaded
            .iter()
            .map(|m| (EventKind::PLUGIN_UNLOADED, m));
        let loaded = report.loaded.iter().map(|m| (EventKind::PLUGIN_LOADED, m));
        for (kind, metadata) in unloaded.chain(loaded) {
            let event = BoxedEvent::new(PluginEvent {
                metadata: metadata.clone(),
            });
            self.bus.publish(&kind, event, DispatchMode::Blocking).await;
        }
    }
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.read();
        f.debug_struct("PluginManager")
            .field(
                "plugins",
                &entries
                    .iter()
                    .map(|e| (e.id().to_string(), e.state()))
                    .collect::<Vec<_>>(),
            )
            .field("disabled", &self.disabled.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::future::BoxFuture;
    use hearth_core::{CommandSource, EventContext, SourceKind};
    use tokio_test::assert_ok;

    use super::*;
    use crate::command::{CommandError, CommandNode, CommandOutcome};
    use crate::plugin::StaticPlugins;

    static LOG: parking_lot::Mutex<Vec<String>> = parking_lot::Mutex::new(Vec::new());

    fn record(id: &str, what: &str) {
        LOG.lock().push(format!("{id}:{what}"));
    }

    /// Log lines of the given plugin, without the id.
    fn history(id: &str) -> Vec<String> {
        let prefix = format!("{id}:");
        LOG.lock()
            .iter()
            .filter_map(|line| line.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    #[derive(Debug)]
    struct Ping;

    impl Event for Ping {
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    /// A scriptable plugin.
    struct Scripted {
        id: &'static str,
        hits: Option<&'static AtomicUsize>,
        command: Option<&'static str>,
        help: bool,
        fail_in: Option<&'static str>,
        panic_in: Option<&'static str>,
    }

    impl Scripted {
        const fn new(id: &'static str) -> Self {
            Self {
                id,
                hits: None,
                command: None,
                help: false,
                fail_in: None,
                panic_in: None,
            }
        }

        fn hook(&self, hook: &str) -> Result<(), BoxError> {
            record(self.id, hook);
            if self.panic_in == Some(hook) {
                panic!("{} exploded", self.id);
            }
            if self.fail_in == Some(hook) {
                return Err(format!("{} refused", self.id).into());
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Plugin for Scripted {
        async fn on_load(
            &self,
            ctx: &PluginContext,
            previous: Option<Arc<dyn Plugin>>,
        ) -> Result<(), BoxError> {
            if previous.as_deref().is_some_and(|p| p.is::<Scripted>()) {
                record(self.id, "handover");
            }
            if let Some(hits) = self.hits {
                ctx.register_event_listener(EventKind::new("test.ping"), 1000, move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                })?;
            }
            if let Some(literal) = self.command {
                ctx.register_command(CommandNode::literal(literal).runs(|c| async move {
                    c.reply("pong");
                    Ok(())
                }))?;
            }
            if self.help {
                ctx.register_help_message(
                    format!("!!{}", self.id),
                    "scripted help",
                    PermissionLevel::User,
                )?;
            }
            self.hook("on_load")
        }

        async fn on_start(&self, _ctx: &PluginContext) -> Result<(), BoxError> {
            self.hook("on_start")
        }

        async fn on_unload(&self, _ctx: &PluginContext) -> Result<(), BoxError> {
            self.hook("on_unload")
        }
    }

    macro_rules! scripted {
        ($create:ident => $plugin:expr) => {
            fn $create() -> Box<dyn Plugin> {
                Box::new($plugin)
            }
        };
    }

    fn manager() -> Arc<PluginManager> {
        Arc::new(PluginManager::new(
            Arc::new(EventBus::default()),
            HashMap::new(),
        ))
    }

    async fn ping(manager: &PluginManager) {
        manager
            .bus()
            .publish(
                &EventKind::new("test.ping"),
                BoxedEvent::new(Ping),
                DispatchMode::Blocking,
            )
            .await;
    }

    fn console() -> CommandSource {
        CommandSource::new(SourceKind::Console, PermissionLevel::Owner)
    }

    // ─── Dependency resolution ───────────────────────────────────────────────

    scripted!(res_base => Scripted::new("res_base"));
    scripted!(res_app => Scripted::new("res_app"));

    static RES_BASE: PluginDescriptor = PluginDescriptor::new("res_base", res_base).version("1.5.0");
    static RES_BASE_TWO: PluginDescriptor =
        PluginDescriptor::new("res_base", res_base).version("2.0.0");
    static RES_APP: PluginDescriptor = PluginDescriptor::new("res_app", res_app)
        .version("1.0.0")
        .depends_on(&[("res_base", ">=1.0, <2.0"), ("hearth", "*")]);

    #[tokio::test]
    async fn test_dependency_resolution() {
        let manager = manager();
        let err = manager.load(RES_APP).await.unwrap_err();
        assert!(matches!(
            err,
            PluginError::DependencyUnsatisfied { ref plugin, .. } if plugin == "res_app"
        ));
        assert!(manager.plugin_list().is_empty());

        let report = manager
            .load_all(Arc::new(StaticPlugins::new([RES_APP, RES_BASE])))
            .await
            .unwrap();
        assert_eq!(report.loaded_ids(), vec!["res_base", "res_app"]);
        assert_eq!(manager.plugin_state("res_app"), Some(PluginState::Started));
    }

    #[tokio::test]
    async fn test_version_mismatch_fails_batch() {
        let manager = manager();
        let err = manager
            .load_all(Arc::new(StaticPlugins::new([RES_BASE_TWO, RES_APP])))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("found 2.0.0"));
        assert!(manager.plugin_state("res_base").is_none());
    }

    scripted!(cyc_a => Scripted::new("cyc_a"));
    scripted!(cyc_b => Scripted::new("cyc_b"));

    #[tokio::test]
    async fn test_cycle_fails_batch() {
        let manager = manager();
        let source = StaticPlugins::new([
            PluginDescriptor::new("cyc_a", cyc_a).depends_on(&[("cyc_b", "*")]),
            PluginDescriptor::new("cyc_b", cyc_b).depends_on(&[("cyc_a", "*")]),
        ]);
        let err = manager.load_all(Arc::new(source)).await.unwrap_err();
        assert!(err.to_string().contains("cycle"));
        assert!(history("cyc_a").is_empty());
    }

    // ─── Teardown ────────────────────────────────────────────────────────────

    static EXACT_HITS: AtomicUsize = AtomicUsize::new(0);
    scripted!(exact => Scripted {
        hits: Some(&EXACT_HITS),
        command: Some("!!exact"),
        ..Scripted::new("exact")
    });

    #[tokio::test]
    async fn test_unload_is_exact() {
        let manager = manager();
        manager
            .load(PluginDescriptor::new("exact", exact))
            .await
            .unwrap();

        ping(&manager).await;
        assert_eq!(EXACT_HITS.load(Ordering::SeqCst), 1);
        let source = console();
        assert!(manager.tree().execute(&source, "!!exact").await.is_executed());
        assert_eq!(source.replies(), vec!["pong"]);

        let report = manager.unload("exact").await.unwrap();
        assert_eq!(report.unloaded_ids(), vec!["exact"]);
        assert_eq!(history("exact"), vec!["on_load", "on_start", "on_unload"]);

        ping(&manager).await;
        assert_eq!(EXACT_HITS.load(Ordering::SeqCst), 1);
        assert_eq!(manager.bus().plugin_listener_count("exact"), 0);
        assert!(matches!(
            manager.tree().execute(&console(), "!!exact").await,
            CommandOutcome::Rejected(CommandError::NotFound { .. })
        ));
        assert!(manager.plugin_state("exact").is_none());
    }

    scripted!(guard_base => Scripted::new("guard_base"));
    scripted!(guard_app => Scripted::new("guard_app"));

    #[tokio::test]
    async fn test_dependents_block_unload() {
        let manager = manager();
        let source = StaticPlugins::new([
            PluginDescriptor::new("guard_base", guard_base),
            PluginDescriptor::new("guard_app", guard_app).depends_on(&[("guard_base", "*")]),
        ]);
        manager.load_all(Arc::new(source)).await.unwrap();

        match manager.unload("guard_base").await {
            Err(PluginError::DependentsStillLoaded { dependents, .. }) => {
                assert_eq!(dependents, vec!["guard_app"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(manager.plugin_state("guard_base"), Some(PluginState::Started));

        assert_ok!(manager.unload("guard_app").await);
        assert_ok!(manager.unload("guard_base").await);
        assert!(matches!(
            manager.unload("guard_base").await,
            Err(PluginError::NotLoaded(_))
        ));
    }

    // ─── Reload ──────────────────────────────────────────────────────────────

    static RELOAD_HITS: AtomicUsize = AtomicUsize::new(0);
    scripted!(reload_base => Scripted {
        hits: Some(&RELOAD_HITS),
        command: Some("!!reload_base"),
        ..Scripted::new("reload_base")
    });
    scripted!(reload_app => Scripted::new("reload_app"));
    scripted!(reload_other => Scripted::new("reload_other"));

    #[tokio::test]
    async fn test_reload_round_trip() {
        let manager = manager();
        let source = StaticPlugins::new([
            PluginDescriptor::new("reload_base", reload_base),
            PluginDescriptor::new("reload_app", reload_app).depends_on(&[("reload_base", "*")]),
            PluginDescriptor::new("reload_other", reload_other),
        ]);
        manager.load_all(Arc::new(source)).await.unwrap();
        let other = manager.instance("reload_other").unwrap();

        let report = manager.reload("reload_base").await.unwrap();
        assert_eq!(report.unloaded_ids(), vec!["reload_app", "reload_base"]);
        assert_eq!(report.loaded_ids(), vec!["reload_base", "reload_app"]);
        assert!(history("reload_base").contains(&"handover".to_string()));
        assert!(history("reload_app").contains(&"handover".to_string()));
        assert!(Arc::ptr_eq(&other, &manager.instance("reload_other").unwrap()));

        assert_eq!(manager.bus().plugin_listener_count("reload_base"), 1);
        ping(&manager).await;
        assert_eq!(RELOAD_HITS.load(Ordering::SeqCst), 1);
        assert!(
            manager
                .tree()
                .execute(&console(), "!!reload_base")
                .await
                .is_executed()
        );
        assert_eq!(manager.tree().roots().len(), 1);
    }

    // ─── Failure isolation ───────────────────────────────────────────────────

    static ISOLATION_HITS: AtomicUsize = AtomicUsize::new(0);
    scripted!(iso_refuses => Scripted {
        fail_in: Some("on_load"),
        ..Scripted::new("iso_refuses")
    });
    scripted!(iso_panics => Scripted {
        hits: Some(&ISOLATION_HITS),
        panic_in: Some("on_start"),
        ..Scripted::new("iso_panics")
    });
    scripted!(iso_orphan => Scripted::new("iso_orphan"));
    scripted!(iso_fine => Scripted::new("iso_fine"));

    #[tokio::test]
    async fn test_hook_failures_are_isolated() {
        let manager = manager();
        let source = StaticPlugins::new([
            PluginDescriptor::new("iso_refuses", iso_refuses),
            PluginDescriptor::new("iso_panics", iso_panics),
            PluginDescriptor::new("iso_orphan", iso_orphan).depends_on(&[("iso_refuses", "*")]),
            PluginDescriptor::new("iso_fine", iso_fine),
        ]);
        let report = manager.load_all(Arc::new(source)).await.unwrap();

        assert_eq!(report.loaded_ids(), vec!["iso_fine"]);
        let mut failed = report.failed_ids();
        failed.sort();
        assert_eq!(failed, vec!["iso_orphan", "iso_panics", "iso_refuses"]);
        assert!(history("iso_orphan").is_empty());
        assert_eq!(manager.plugin_state("iso_panics"), Some(PluginState::Failed));
        assert_eq!(manager.bus().plugin_listener_count("iso_panics"), 0);

        ping(&manager).await;
        assert_eq!(ISOLATION_HITS.load(Ordering::SeqCst), 0);

        manager.unload("iso_panics").await.unwrap();
        assert!(manager.plugin_state("iso_panics").is_none());
    }

    // ─── Reentrancy ──────────────────────────────────────────────────────────

    static REENTRANT_MANAGER: parking_lot::Mutex<Option<Weak<PluginManager>>> =
        parking_lot::Mutex::new(None);

    #[derive(Default)]
    struct Nested;

    #[async_trait]
    impl Plugin for Nested {
        async fn on_load(
            &self,
            _ctx: &PluginContext,
            _previous: Option<Arc<dyn Plugin>>,
        ) -> Result<(), BoxError> {
            let manager = REENTRANT_MANAGER.lock().clone().and_then(|w| w.upgrade());
            if let Some(manager) = manager {
                let outcome = manager.unload("nested").await;
                if matches!(outcome, Err(PluginError::ReentrantLifecycle)) {
                    record("nested", "refused");
                }
                let outcome = manager.unload_all().await;
                if matches!(outcome, Err(PluginError::ReentrantLifecycle)) {
                    record("nested", "refused_all");
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_nested_lifecycle_fails_fast() {
        let manager = manager();
        *REENTRANT_MANAGER.lock() = Some(Arc::downgrade(&manager));

        let descriptor = crate::define_plugin!(Nested { id: "nested" });
        let report = manager.load(descriptor).await.unwrap();
        assert_eq!(report.loaded_ids(), vec!["nested"]);
        assert_eq!(history("nested"), vec!["refused", "refused_all"]);
    }

    // ─── Enable / disable / refresh ──────────────────────────────────────────

    scripted!(toggle => Scripted::new("toggle"));

    #[tokio::test]
    async fn test_disable_and_enable() {
        let manager = manager();
        let source = Arc::new(StaticPlugins::new([PluginDescriptor::new("toggle", toggle)]));
        manager.load_all(source.clone()).await.unwrap();

        let report = manager.disable("toggle").await.unwrap();
        assert_eq!(report.unloaded_ids(), vec!["toggle"]);
        assert!(manager.is_disabled("toggle"));

        let report = manager.load_all(source).await.unwrap();
        assert!(report.is_empty());
        assert!(matches!(
            manager.load(PluginDescriptor::new("toggle", toggle)).await,
            Err(PluginError::Disabled(_))
        ));

        let report = manager.enable("toggle").await.unwrap();
        assert_eq!(report.loaded_ids(), vec!["toggle"]);
        assert!(!manager.is_disabled("toggle"));
        assert!(matches!(
            manager.enable("missing").await,
            Err(PluginError::NotFound(_))
        ));
    }

    scripted!(fresh_kept => Scripted::new("fresh_kept"));
    scripted!(fresh_gone => Scripted::new("fresh_gone"));
    scripted!(fresh_new => Scripted::new("fresh_new"));

    #[tokio::test]
    async fn test_refresh_follows_source() {
        let manager = manager();
        assert!(matches!(
            manager.refresh_current().await,
            Err(PluginError::NoSource)
        ));
        let source = Arc::new(StaticPlugins::new([
            PluginDescriptor::new("fresh_kept", fresh_kept),
            PluginDescriptor::new("fresh_gone", fresh_gone),
        ]));
        manager.load_all(source.clone()).await.unwrap();
        let kept = manager.instance("fresh_kept").unwrap();

        source.remove("fresh_gone");
        source.add(PluginDescriptor::new("fresh_new", fresh_new));
        let report = manager.refresh(source).await.unwrap();

        assert_eq!(report.unloaded_ids(), vec!["fresh_gone"]);
        assert_eq!(report.loaded_ids(), vec!["fresh_new"]);
        assert!(Arc::ptr_eq(&kept, &manager.instance("fresh_kept").unwrap()));

        let report = assert_ok!(manager.refresh_current().await);
        assert!(report.is_empty());
    }

    // ─── Help and events ─────────────────────────────────────────────────────

    scripted!(helpful => Scripted {
        help: true,
        ..Scripted::new("helpful")
    });

    #[tokio::test]
    async fn test_help_and_plugin_events() {
        let manager = manager();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        manager.bus().subscribe(
            "observer",
            EventKind::PLUGIN_LOADED,
            1000,
            move |ctx: EventContext| -> BoxFuture<'static, Result<(), BoxError>> {
                let matched = ctx
                    .downcast::<PluginEvent>()
                    .is_some_and(|e| e.id() == "helpful");
                if matched {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                Box::pin(async { Ok(()) })
            },
        );

        manager
            .load(PluginDescriptor::new("helpful", helpful))
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        let help = manager.help_messages(PermissionLevel::User);
        assert_eq!(help.len(), 1);
        assert_eq!(help[0].prefix, "!!helpful");
        assert!(manager.help_messages(PermissionLevel::Guest).is_empty());

        assert_ok!(manager.unload_all().await);
        assert!(manager.help_messages(PermissionLevel::Owner).is_empty());
    }

    scripted!(ordered => Scripted::new("ordered"));

    #[tokio::test(start_paused = true)]
    async fn test_plugin_events_keep_operation_order() {
        let manager = manager();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for kind in [EventKind::PLUGIN_LOADED, EventKind::PLUGIN_UNLOADED] {
            let log = log.clone();
            manager.bus().subscribe(
                "observer",
                kind,
                1000,
                move |ctx: EventContext| -> BoxFuture<'static, Result<(), BoxError>> {
                    let log = log.clone();
                    let kind = ctx.kind().to_string();
                    Box::pin(async move {
                        log.lock().push(format!("{kind} begin"));
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        log.lock().push(format!("{kind} end"));
                        Ok(())
                    })
                },
            );
        }

        // The unload queues on the lifecycle lock while the load runs.
        let load = manager.load(PluginDescriptor::new("ordered", ordered));
        let unload = async {
            tokio::task::yield_now().await;
            manager.unload("ordered").await
        };
        let (loaded, unloaded) = tokio::join!(load, unload);
        assert_eq!(assert_ok!(loaded).loaded_ids(), vec!["ordered"]);
        assert_eq!(assert_ok!(unloaded).unloaded_ids(), vec!["ordered"]);

        let loaded = EventKind::PLUGIN_LOADED;
        let unloaded = EventKind::PLUGIN_UNLOADED;
        assert_eq!(
            *log.lock(),
            vec![
                format!("{loaded} begin"),
                format!("{loaded} end"),
                format!("{unloaded} begin"),
                format!("{unloaded} end"),
            ]
        );
    }
}
