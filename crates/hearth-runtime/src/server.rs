//! The server handle handed to plugins.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use hearth_core::{
    BoxedEvent, Dialect, DispatchMode, DispatchReport, EventBus, EventKind, Info, InfoReactor,
    PermissionLevel, PermissionResolver, ProcessBridge, ProcessConfig, ProcessError,
    ProcessResult, ReplySink, ServerPhase,
};
use hearth_framework::plugin::{Plugin, PluginDescriptor, PluginMetadata, PluginState};
use hearth_framework::{LifecycleReport, PluginManager, PluginResult, ServerControl};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{CommandsConfig, HearthConfig, ServerConfig};
use crate::dispatch::{ServerReplySink, Work, WorkQueue};

/// Receivers consumed once by the runtime's background tasks.
pub(crate) struct TaskInputs {
    pub(crate) queue: mpsc::Receiver<Work>,
    pub(crate) outbox: mpsc::UnboundedReceiver<String>,
}

/// [`ServerControl`] over one supervised process.
///
/// Owns the process bridge and the reactor; plugin operations go to the
/// [`PluginManager`], events to the [`EventBus`].
pub struct HearthServer {
    me: Weak<HearthServer>,
    config: ServerConfig,
    commands: CommandsConfig,
    bridge: ProcessBridge,
    reactor: InfoReactor,
    bus: Arc<EventBus>,
    plugins: Arc<PluginManager>,
    permissions: Arc<dyn PermissionResolver>,
    queue: WorkQueue,
    replies: Arc<ServerReplySink>,
    inputs: parking_lot::Mutex<Option<TaskInputs>>,
    /// The task reacting to the current process's output.
    pump: AsyncMutex<Option<JoinHandle<()>>>,
    /// Incremented on every start; an exiting process only ends the daemon
    /// if no newer process was started.
    generation: AtomicU64,
    restarting: AtomicBool,
    shutdown: CancellationToken,
}

impl HearthServer {
    pub(crate) fn new(config: &HearthConfig, permissions: Arc<dyn PermissionResolver>) -> Arc<Self> {
        let dialect = config.server.dialect.parse().unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to the vanilla dialect");
            Dialect::Vanilla
        });

        let mut process = ProcessConfig::new(&config.server.command);
        process.args.clone_from(&config.server.args);
        process.working_dir.clone_from(&config.server.working_dir);

        let bus = Arc::new(EventBus::new(
            config.dispatch.listener_timeout(),
            config.dispatch.detached_concurrency,
        ));
        let plugins = Arc::new(
            PluginManager::new(bus.clone(), config.plugins.settings.clone())
                .with_disabled(config.plugins.disabled.iter().cloned()),
        );
        let (queue, queue_rx) = WorkQueue::new(
            config.dispatch.queue_size,
            config.dispatch.queue_full_warn_interval(),
        );
        let (replies, outbox) = ServerReplySink::new();

        let server = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config: config.server.clone(),
            commands: config.commands.clone(),
            bridge: ProcessBridge::new(process),
            reactor: InfoReactor::with_dialect(dialect),
            bus,
            plugins,
            permissions,
            queue,
            replies: Arc::new(replies),
            inputs: parking_lot::Mutex::new(Some(TaskInputs {
                queue: queue_rx,
                outbox,
            })),
            pump: AsyncMutex::new(None),
            generation: AtomicU64::new(0),
            restarting: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });
        let handle: Weak<dyn ServerControl> = server.me.clone();
        server.plugins.attach_server(handle);
        server
    }

    pub fn bridge(&self) -> &ProcessBridge {
        &self.bridge
    }

    pub fn reactor(&self) -> &InfoReactor {
        &self.reactor
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        &self.plugins
    }

    pub fn permissions(&self) -> &Arc<dyn PermissionResolver> {
        &self.permissions
    }

    pub fn commands(&self) -> &CommandsConfig {
        &self.commands
    }

    pub(crate) fn reply_sink(&self) -> Arc<dyn ReplySink> {
        self.replies.clone()
    }

    pub(crate) fn take_inputs(&self) -> Option<TaskInputs> {
        self.inputs.lock().take()
    }

    /// Queues a console line for dispatch.
    pub async fn inject_console(&self, line: &str) -> Arc<Info> {
        let info = self.reactor.inject_console(line);
        if !self.queue.push(Work::Console(info.clone())).await {
            debug!(line, "Dispatch task stopped, console line dropped");
        }
        info
    }

    /// Waits until everything queued so far has been dispatched.
    pub(crate) async fn flush(&self) {
        self.queue.flush().await;
    }

    /// Asks the runtime to shut down.
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Waits for the reactor task of the last process to finish.
    pub(crate) async fn join_pump(&self) {
        let handle = self.pump.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!(error = %e, "Reactor task failed");
        }
    }

    /// Reacts to one process's output until it exits.
    ///
    /// `SERVER_START` is queued before any line, `SERVER_STOP` after the last.
    async fn pump(self: Arc<Self>, mut lines: mpsc::UnboundedReceiver<String>, generation: u64) {
        let started = self.reactor.process_started();
        let start = Work::Lifecycle {
            kind: EventKind::SERVER_START,
            event: BoxedEvent::new(started),
            shutdown: false,
        };
        if !self.queue.push(start).await {
            return;
        }

        while let Some(line) = lines.recv().await {
            let reaction = self.reactor.react(&line);
            if !self.queue.push(Work::Output(reaction)).await {
                return;
            }
        }

        let exit = self.bridge.wait_for_exit(self.config.stop_timeout()).await;
        let code = exit.and_then(|e| e.code);
        let stopped = self.reactor.process_exited(code);
        let shutdown = self.config.exit_with_server
            && !self.restarting.load(Ordering::Acquire)
            && self.generation.load(Ordering::Acquire) == generation;
        info!(code = ?code, "Server stopped");

        self.queue
            .push(Work::Lifecycle {
                kind: EventKind::SERVER_STOP,
                event: BoxedEvent::new(stopped),
                shutdown,
            })
            .await;
    }
}

#[async_trait]
impl ServerControl for HearthServer {
    async fn start(&self) -> ProcessResult<()> {
        let mut pump = self.pump.lock().await;
        if self.bridge.is_alive() {
            return Err(ProcessError::AlreadyRunning);
        }
        if let Some(previous) = pump.take() {
            let _ = previous.await;
        }
        let me = self.me.upgrade().ok_or(ProcessError::NotRunning)?;

        info!(command = %self.config.command, args = ?self.config.args, "Starting server");
        let lines = self.bridge.start().await?;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *pump = Some(tokio::spawn(me.pump(lines, generation)));
        Ok(())
    }

    async fn stop(&self) -> ProcessResult<()> {
        if !self.bridge.is_alive() {
            return Err(ProcessError::NotRunning);
        }

        let timeout = self.config.stop_timeout();
        info!(command = %self.config.stop_command, "Stopping server");
        if let Err(e) = self.bridge.write(&self.config.stop_command).await {
            debug!(error = %e, "Stop command not delivered");
        }
        if self.bridge.wait_for_exit(timeout).await.is_some() {
            return Ok(());
        }

        warn!(timeout = ?timeout, "Server ignored the stop command, terminating it");
        match self.bridge.stop(timeout).await {
            Ok(_) | Err(ProcessError::NotRunning) => Ok(()),
            Err(e) => {
                error!(error = %e, "Server could not be stopped, running degraded");
                Err(e)
            }
        }
    }

    async fn restart(&self) -> ProcessResult<()> {
        self.restarting.store(true, Ordering::Release);
        let result = async {
            match self.stop().await {
                Ok(()) | Err(ProcessError::NotRunning) => {}
                Err(e) => return Err(e),
            }
            self.start().await
        }
        .await;
        self.restarting.store(false, Ordering::Release);
        result
    }

    fn is_server_running(&self) -> bool {
        self.bridge.is_alive()
    }

    fn is_server_startup(&self) -> bool {
        self.bridge.is_alive() && self.reactor.phase() == ServerPhase::Started
    }

    fn server_pid(&self) -> Option<u32> {
        self.bridge.pid()
    }

    async fn wait_for_start(&self) {
        self.bridge.wait_stopped().await;
    }

    async fn stop_exit(&self) -> ProcessResult<()> {
        let stopped = match self.stop().await {
            Ok(()) | Err(ProcessError::NotRunning) => Ok(()),
            Err(e) => Err(e),
        };
        self.request_shutdown();
        stopped
    }

    fn exit(&self) -> ProcessResult<()> {
        if self.bridge.is_alive() {
            return Err(ProcessError::AlreadyRunning);
        }
        info!("Exit requested");
        self.request_shutdown();
        Ok(())
    }

    async fn execute(&self, command: &str) -> ProcessResult<()> {
        self.bridge.write(command).await
    }

    async fn execute_command(&self, plugin: &str, command: &str) {
        let work = Work::Plugin {
            plugin: plugin.to_string(),
            info: self.reactor.inject_plugin(command),
        };
        if !self.queue.push_detached(work) {
            debug!(plugin, command, "Dispatch task stopped, plugin command dropped");
        }
    }

    async fn load_plugin(&self, descriptor: PluginDescriptor) -> PluginResult<LifecycleReport> {
        self.plugins.load(descriptor).await
    }

    async fn unload_plugin(&self, id: &str) -> PluginResult<LifecycleReport> {
        self.plugins.unload(id).await
    }

    async fn reload_plugin(&self, id: &str) -> PluginResult<LifecycleReport> {
        self.plugins.reload(id).await
    }

    async fn enable_plugin(&self, id: &str) -> PluginResult<LifecycleReport> {
        self.plugins.enable(id).await
    }

    async fn disable_plugin(&self, id: &str) -> PluginResult<LifecycleReport> {
        self.plugins.disable(id).await
    }

    async fn refresh_plugins(&self) -> PluginResult<LifecycleReport> {
        self.plugins.refresh_current().await
    }

    fn plugin_instance(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.instance(id)
    }

    fn plugin_list(&self) -> Vec<(PluginMetadata, PluginState)> {
        self.plugins.plugin_list()
    }

    async fn dispatch_event(
        &self,
        kind: EventKind,
        event: BoxedEvent,
        mode: DispatchMode,
    ) -> DispatchReport {
        self.bus.publish(&kind, event, mode).await
    }

    fn permission_level(&self, player: &str) -> PermissionLevel {
        self.permissions.player_level(player)
    }

    fn set_permission_level(&self, player: &str, level: PermissionLevel) {
        self.permissions.set_level(player, level);
    }
}

impl std::fmt::Debug for HearthServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HearthServer")
            .field("bridge", &self.bridge)
            .field("phase", &self.reactor.phase())
            .field("dialect", &self.reactor.classifier_name())
            .finish_non_exhaustive()
    }
}
