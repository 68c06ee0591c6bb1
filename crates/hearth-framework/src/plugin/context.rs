//! The handle a plugin receives in its hooks.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use hearth_core::{
    BoxError, BoxedEvent, DispatchMode, DispatchReport, EventBus, EventContext, EventKind,
    ListenerFn, PermissionLevel,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::core::PluginState;
use super::metadata::PluginMetadata;
use super::registry::HelpMessage;
use crate::command::{CommandNode, NodeError};
use crate::error::{PluginError, PluginResult};
use crate::server::{ServerControl, ServerHandle};

struct PendingListener {
    kind: EventKind,
    priority: i32,
    callback: ListenerFn,
}

/// Everything a plugin registered, plus its lifecycle state.
///
/// Listeners registered before the plugin starts are staged and subscribed
/// when it does. Commands and help messages are accepted until then.
#[derive(Default)]
pub(crate) struct Registrations {
    state: PluginState,
    pending: Vec<PendingListener>,
    commands: Vec<Arc<CommandNode>>,
    help: Vec<HelpMessage>,
}

// ─── PluginContext ────────────────────────────────────────────────────────────

/// Context passed to every plugin hook.
///
/// Cheap to clone; listeners and executors may capture it.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(serde::Deserialize, Default)]
/// #[serde(default)]
/// struct MotdConfig { message: String }
///
/// async fn on_load(&self, ctx: &PluginContext, _: Option<Arc<dyn Plugin>>) -> Result<(), BoxError> {
///     let cfg: MotdConfig = ctx.config()?;
///     ctx.register_command(CommandNode::literal("!!motd").runs(move |c| {
///         let message = cfg.message.clone();
///         async move { c.reply(message); Ok(()) }
///     }))?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct PluginContext {
    metadata: Arc<PluginMetadata>,
    id: Arc<str>,
    config: Arc<Value>,
    bus: Arc<EventBus>,
    server: Option<Weak<dyn ServerControl>>,
    registrations: Arc<Mutex<Registrations>>,
}

impl PluginContext {
    pub(crate) fn new(
        metadata: Arc<PluginMetadata>,
        config: Arc<Value>,
        bus: Arc<EventBus>,
        server: Option<Weak<dyn ServerControl>>,
    ) -> Self {
        Self {
            id: Arc::from(metadata.id.as_str()),
            metadata,
            config,
            bus,
            server,
            registrations: Arc::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    /// Current lifecycle state of this plugin.
    pub fn state(&self) -> PluginState {
        self.registrations.lock().state
    }

    /// Deserialise the plugin's config section into `T`.
    ///
    /// The section is `plugins.settings.<id>`, or `null` when absent; use
    /// `#[serde(default)]` on the struct to make all fields optional.
    pub fn config<T>(&self) -> serde_json::Result<T>
    where
        T: DeserializeOwned,
    {
        T::deserialize(self.config.as_ref())
    }

    pub fn raw_config(&self) -> &Value {
        &self.config
    }

    /// The server handle.
    pub fn server(&self) -> PluginResult<ServerHandle> {
        self.server
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(PluginError::ServerUnavailable)
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Runs `command` through the command tree as this plugin.
    pub async fn execute_command(&self, command: &str) -> PluginResult<()> {
        self.server()?.execute_command(&self.id, command).await;
        Ok(())
    }

    /// Publishes a custom event.
    pub async fn dispatch_event(
        &self,
        kind: EventKind,
        event: BoxedEvent,
        mode: DispatchMode,
    ) -> DispatchReport {
        self.bus.publish(&kind, event, mode).await
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Registers an event listener owned by this plugin.
    ///
    /// Lower priorities run first. Before the plugin has started the
    /// listener is staged; afterwards it is subscribed at once.
    pub fn register_event_listener<F, Fut>(
        &self,
        kind: EventKind,
        priority: i32,
        callback: F,
    ) -> PluginResult<()>
    where
        F: Fn(EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let callback: ListenerFn = Arc::new(
            move |ctx: EventContext| -> BoxFuture<'static, Result<(), BoxError>> {
                Box::pin(callback(ctx))
            },
        );
        let mut regs = self.registrations.lock();
        match regs.state {
            PluginState::Started => {
                self.bus.subscribe_arc(&self.id, kind, priority, callback);
            }
            state if state.is_registering() => regs.pending.push(PendingListener {
                kind,
                priority,
                callback,
            }),
            _ => return Err(PluginError::NotLoaded(self.id.to_string())),
        }
        Ok(())
    }

    /// Registers a root command node.
    pub fn register_command(&self, node: CommandNode) -> PluginResult<()> {
        node.validate()?;
        if !node.is_literal() {
            return Err(NodeError::NotALiteralRoot(node.name()).into());
        }
        let mut regs = self.registrations.lock();
        if !regs.state.is_registering() {
            return Err(PluginError::RegistrationClosed(self.id.to_string()));
        }
        debug!(plugin = %self.id, command = %node.name(), "Command registered");
        regs.commands.push(Arc::new(node));
        Ok(())
    }

    /// Registers a help entry shown to sources of at least `permission`.
    pub fn register_help_message(
        &self,
        prefix: impl Into<String>,
        message: impl Into<String>,
        permission: PermissionLevel,
    ) -> PluginResult<()> {
        let mut regs = self.registrations.lock();
        if !regs.state.is_registering() {
            return Err(PluginError::RegistrationClosed(self.id.to_string()));
        }
        regs.help.push(HelpMessage {
            plugin: self.id.to_string(),
            prefix: prefix.into(),
            message: message.into(),
            permission,
        });
        Ok(())
    }

    // ─── Manager side ────────────────────────────────────────────────────────

    pub(crate) fn set_state(&self, state: PluginState) {
        self.registrations.lock().state = state;
    }

    /// Subscribes staged listeners and marks the plugin started.
    pub(crate) fn activate(&self) -> usize {
        let mut regs = self.registrations.lock();
        let pending = std::mem::take(&mut regs.pending);
        let count = pending.len();
        for listener in pending {
            self.bus
                .subscribe_arc(&self.id, listener.kind, listener.priority, listener.callback);
        }
        regs.state = PluginState::Started;
        count
    }

    /// Drops every registration and unsubscribes all listeners.
    ///
    /// Holds the registration lock while unsubscribing so a concurrent
    /// registration either lands before and is removed, or sees the final
    /// state and is refused.
    pub(crate) fn close(&self, state: PluginState) -> usize {
        let mut regs = self.registrations.lock();
        regs.state = state;
        regs.pending.clear();
        regs.commands.clear();
        regs.help.clear();
        self.bus.unsubscribe_all(&self.id)
    }

    pub(crate) fn commands(&self) -> Vec<Arc<CommandNode>> {
        self.registrations.lock().commands.clone()
    }

    pub(crate) fn help_messages(&self) -> Vec<HelpMessage> {
        self.registrations.lock().help.clone()
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let regs = self.registrations.lock();
        f.debug_struct("PluginContext")
            .field("id", &self.id)
            .field("state", &regs.state)
            .field("pending", &regs.pending.len())
            .field("commands", &regs.commands.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use hearth_core::{Event, PermissionLevel};
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug)]
    struct Ping;

    impl Event for Ping {
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    fn context(config: Value) -> PluginContext {
        let metadata = PluginMetadata {
            id: "sample".into(),
            version: semver::Version::new(1, 0, 0),
            name: "Sample".into(),
            description: String::new(),
            authors: Vec::new(),
            link: None,
            dependencies: Vec::new(),
        };
        PluginContext::new(
            Arc::new(metadata),
            Arc::new(config),
            Arc::new(EventBus::default()),
            None,
        )
    }

    #[test]
    fn test_typed_config() {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct Config {
            greeting: String,
            times: u32,
        }

        let ctx = context(json!({ "greeting": "hi" }));
        let config: Config = ctx.config().unwrap();
        assert_eq!(config.greeting, "hi");
        assert_eq!(config.times, 0);

        let ctx = context(json!({ "times": "many" }));
        assert!(ctx.config::<Config>().is_err());
    }

    #[tokio::test]
    async fn test_listeners_are_staged_until_started() {
        let ctx = context(Value::Null);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let kind = EventKind::new("sample.ping");
        ctx.register_event_listener(kind.clone(), 1000, move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .unwrap();

        ctx.dispatch_event(kind.clone(), BoxedEvent::new(Ping), DispatchMode::Blocking)
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        assert_eq!(ctx.activate(), 1);
        ctx.dispatch_event(kind.clone(), BoxedEvent::new(Ping), DispatchMode::Blocking)
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert_eq!(ctx.close(PluginState::Unloaded), 1);
        ctx.dispatch_event(kind.clone(), BoxedEvent::new(Ping), DispatchMode::Blocking)
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(matches!(
            ctx.register_event_listener(kind, 1000, |_| async { Ok(()) }),
            Err(PluginError::NotLoaded(_))
        ));
    }

    #[test]
    fn test_command_registration_rules() {
        let ctx = context(Value::Null);
        assert!(ctx.register_command(CommandNode::literal("!!sample")).is_ok());
        assert!(matches!(
            ctx.register_command(CommandNode::text("word")),
            Err(PluginError::Command(NodeError::NotALiteralRoot(_)))
        ));
        ctx.register_help_message("!!sample", "Does things", PermissionLevel::User)
            .unwrap();

        ctx.activate();
        assert!(matches!(
            ctx.register_command(CommandNode::literal("!!late")),
            Err(PluginError::RegistrationClosed(_))
        ));
        assert_eq!(ctx.commands().len(), 1);
        assert_eq!(ctx.help_messages().len(), 1);
        assert!(matches!(ctx.server(), Err(PluginError::ServerUnavailable)));
    }

    #[tokio::test]
    async fn test_execute_command_needs_a_server() {
        let ctx = context(Value::Null);
        assert!(matches!(
            ctx.execute_command("!!sample").await,
            Err(PluginError::ServerUnavailable)
        ));
    }
}
