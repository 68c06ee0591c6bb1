//! Runtime orchestration.
//!
//! [`HearthRuntime`] wires the pieces together and owns the background
//! tasks:
//!
//! - the dispatch task, the only consumer of the work queue;
//! - the reply writer, which turns player replies into `tellraw` lines;
//! - the console reader, fed by a dedicated thread blocked on stdin;
//! - one reactor task per server process, spawned by
//!   [`ServerControl::start`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use hearth_runtime::HearthRuntime;
//!
//! // Auto-loads hearth.toml from the current directory
//! let runtime = HearthRuntime::new();
//! runtime.run().await?;
//!
//! // Custom configuration
//! let runtime = HearthRuntime::builder()
//!     .config_file("config/hearth.toml")
//!     .profile("production")
//!     .build()?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future;
use hearth_core::{EventBus, Info, ProcessError, ProcessResult};
use hearth_framework::plugin::{
    LinkedPlugins, PluginCatalog, PluginDescriptor, PluginSource, StaticPlugins,
};
use hearth_framework::{LifecycleReport, PluginManager, ServerControl, ServerHandle};
use parking_lot::Mutex;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigLoader, ConfigResult, HearthConfig};
use crate::dispatch;
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use crate::permission::MemoryPermissionStore;
use crate::server::HearthServer;

/// The Hearth daemon: one supervised server plus its plugins.
///
/// A runtime runs once; after [`run`](Self::run) returns it cannot be
/// started again.
pub struct HearthRuntime {
    config: HearthConfig,
    server: Arc<HearthServer>,
    /// Descriptors passed to [`register_plugin`](Self::register_plugin).
    registered: Arc<StaticPlugins>,
    console: bool,
    running: AtomicBool,
    tasks: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl HearthRuntime {
    /// Creates a runtime from `hearth.toml` in the current directory.
    ///
    /// Falls back to the default configuration if loading fails.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                HearthConfig::default()
            });

        Self::from_config(&config)
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from a loaded configuration and initializes logging.
    pub fn from_config(config: &HearthConfig) -> Self {
        logging::init_from_config(&config.logging);

        let permissions = Arc::new(MemoryPermissionStore::from_config(&config.permission));
        let server = HearthServer::new(config, permissions);

        info!(
            command = %config.server.command,
            dialect = %server.reactor().classifier_name(),
            prefixes = ?config.commands.prefixes,
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            server,
            registered: Arc::new(StaticPlugins::default()),
            console: true,
            running: AtomicBool::new(false),
            tasks: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Does not read console input from stdin.
    pub fn without_console(mut self) -> Self {
        self.console = false;
        self
    }

    pub fn config(&self) -> &HearthConfig {
        &self.config
    }

    pub fn server(&self) -> &Arc<HearthServer> {
        &self.server
    }

    /// The server handle as plugins see it.
    pub fn handle(&self) -> ServerHandle {
        self.server.clone()
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        self.server.plugins()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        self.server.bus()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Adds a plugin next to the ones linked with `export_plugin!`.
    ///
    /// Loaded at start, or immediately if the runtime is already running.
    pub async fn register_plugin(&self, descriptor: PluginDescriptor) -> RuntimeResult<()> {
        self.registered.add(descriptor);
        if self.is_running() {
            self.plugins().load(descriptor).await?;
        }
        Ok(())
    }

    /// Explicitly registered plugins first, then linked ones.
    fn catalog(&self) -> Arc<dyn PluginSource> {
        Arc::new(
            PluginCatalog::new()
                .with_source(self.registered.clone())
                .with_source(Arc::new(LinkedPlugins)),
        )
    }

    /// Re-enumerates the plugin sources: loads new plugins and unloads
    /// vanished ones, reloading whatever depended on them.
    pub async fn refresh_plugins(&self) -> RuntimeResult<LifecycleReport> {
        Ok(self.plugins().refresh(self.catalog()).await?)
    }

    // =========================================================================
    // Server
    // =========================================================================

    pub async fn start_server(&self) -> ProcessResult<()> {
        self.server.start().await
    }

    pub async fn stop_server(&self) -> ProcessResult<()> {
        self.server.stop().await
    }

    pub async fn restart_server(&self) -> ProcessResult<()> {
        self.server.restart().await
    }

    /// Handles `line` as if it was typed into the console.
    pub async fn inject_console(&self, line: &str) -> Arc<Info> {
        self.server.inject_console(line).await
    }

    /// Asks a running runtime to shut down.
    pub fn shutdown(&self) {
        self.server.request_shutdown();
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawns the background tasks, loads plugins and starts the server if
    /// `server.auto_start` is set.
    pub async fn start(&self) -> RuntimeResult<()> {
        let inputs = self
            .server
            .take_inputs()
            .ok_or(RuntimeError::AlreadyRunning)?;
        self.running.store(true, Ordering::Release);
        info!("Starting Hearth runtime");

        {
            let mut handles = self.handles.lock();
            handles.push(tokio::spawn(dispatch::dispatch(
                self.server.clone(),
                inputs.queue,
                self.tasks.clone(),
            )));
            handles.push(tokio::spawn(dispatch::write_replies(
                self.server.clone(),
                inputs.outbox,
                self.tasks.clone(),
            )));
            if self.console {
                handles.push(tokio::spawn(read_console(
                    self.server.clone(),
                    self.tasks.clone(),
                )));
            }
        }

        match self.plugins().load_all(self.catalog()).await {
            Ok(report) => info!(
                loaded = ?report.loaded_ids(),
                failed = ?report.failed_ids(),
                "Plugins loaded"
            ),
            Err(e) => error!(error = %e, "Plugin loading failed"),
        }

        if self.config.server.auto_start
            && let Err(e) = self.server.start().await
        {
            error!(error = %e, "Failed to start the server");
            if self.config.server.exit_with_server {
                self.server.request_shutdown();
            }
        }

        Ok(())
    }

    /// Stops the server, delivers its last events and unloads every plugin.
    pub async fn stop(&self) -> RuntimeResult<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            warn!("Runtime is not running");
            return Ok(());
        }
        info!("Stopping Hearth runtime");

        match self.server.stop().await {
            Ok(()) | Err(ProcessError::NotRunning) => {}
            Err(e) => error!(error = %e, "Server did not stop, continuing shutdown"),
        }
        self.server.join_pump().await;
        self.server.flush().await;

        match self.plugins().unload_all().await {
            Ok(report) => info!(unloaded = ?report.unloaded_ids(), "Plugins unloaded"),
            Err(e) => error!(error = %e, "Failed to unload plugins"),
        }

        self.tasks.cancel();
        let handles = std::mem::take(&mut *self.handles.lock());
        for result in future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Runtime task failed");
            }
        }

        info!("Runtime stopped");
        Ok(())
    }

    /// Runs until Ctrl+C, SIGTERM or, with `server.exit_with_server`, the
    /// server exiting.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Runs until `shutdown` completes or a shutdown is requested.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        info!("Hearth is now running. Press Ctrl+C to stop.");

        tokio::select! {
            _ = shutdown => debug!("Shutdown future completed"),
            _ = self.server.shutdown_token().cancelled() => debug!("Shutdown requested"),
        }

        self.stop().await
    }
}

impl Default for HearthRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for Ctrl+C or SIGTERM.
///
/// If no handler can be installed this never completes; the runtime then
/// ends with the server.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            },
            Err(e) => {
                error!(error = %e, "Failed to register SIGTERM handler");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}

/// Reads stdin on a dedicated thread; the thread ends with the process.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("hearth-console".into())
        .spawn(move || {
            use std::io::BufRead;

            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "Console input closed");
                        break;
                    }
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "Console input unavailable");
    }
    rx
}

async fn read_console(server: Arc<HearthServer>, stop: CancellationToken) {
    let mut lines = spawn_stdin_reader();
    loop {
        let line = tokio::select! {
            _ = stop.cancelled() => break,
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        let line = line.trim_end();
        if !line.is_empty() {
            server.inject_console(line).await;
        }
    }
    debug!("Console reader stopped");
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for creating a [`HearthRuntime`] with custom configuration.
///
/// ```rust,ignore
/// let runtime = HearthRuntime::builder()
///     .config_file("config/hearth.toml")
///     .profile("production")
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    console: bool,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            console: true,
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: HearthConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Overrides a single key, e.g. `set("server.auto_start", false)`.
    pub fn set<V: serde::Serialize>(mut self, key: &str, value: V) -> Self {
        self.config_loader = self.config_loader.set(key, value);
        self
    }

    pub fn without_console(mut self) -> Self {
        self.console = false;
        self
    }

    pub fn build(self) -> ConfigResult<HearthRuntime> {
        let config = self.config_loader.load()?;
        let runtime = HearthRuntime::from_config(&config);
        Ok(if self.console {
            runtime
        } else {
            runtime.without_console()
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
