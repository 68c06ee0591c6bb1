//! The server handle plugins talk to.
//!
//! [`ServerControl`] is implemented by the runtime and reached from plugin
//! hooks through [`PluginContext::server`](crate::plugin::PluginContext::server).
//! Listeners and command executors capture the returned [`ServerHandle`].

use std::sync::Arc;

use async_trait::async_trait;
use hearth_core::{
    BoxedEvent, CommandSource, DispatchMode, DispatchReport, EventKind, PermissionLevel,
    ProcessResult,
};

use crate::error::PluginResult;
use crate::manager::LifecycleReport;
use crate::plugin::{Plugin, PluginDescriptor, PluginMetadata, PluginState};

/// Shared server handle.
pub type ServerHandle = Arc<dyn ServerControl>;

/// Builds a `tellraw` command printing `text` to `target`.
///
/// The text is emitted as a JSON text component, so quotes and backslashes
/// are escaped.
pub fn tellraw(target: &str, text: &str) -> String {
    let component = serde_json::json!({ "text": text });
    format!("tellraw {target} {component}")
}

/// Control surface of the supervised server and of the plugin runtime.
///
/// The plugin operations are lifecycle operations: calling them from inside
/// a lifecycle hook fails with
/// [`PluginError::ReentrantLifecycle`](crate::error::PluginError::ReentrantLifecycle).
/// Listeners and command executors may call them freely.
#[async_trait]
pub trait ServerControl: Send + Sync {
    // ─── Server ──────────────────────────────────────────────────────────────

    /// Starts the server process.
    async fn start(&self) -> ProcessResult<()>;

    /// Sends the stop command and waits for the process to exit, killing it
    /// after the configured timeout.
    async fn stop(&self) -> ProcessResult<()>;

    async fn restart(&self) -> ProcessResult<()>;

    fn is_server_running(&self) -> bool;

    /// `true` once the server reported that startup finished.
    fn is_server_startup(&self) -> bool;

    fn server_pid(&self) -> Option<u32>;

    /// Waits until no server process is running, so that a start would be
    /// accepted. Returns at once when the server is stopped.
    async fn wait_for_start(&self);

    /// Stops the server, then shuts the daemon down.
    ///
    /// The shutdown is requested even when the stop fails.
    async fn stop_exit(&self) -> ProcessResult<()>;

    /// Shuts the daemon down.
    ///
    /// Fails with [`ProcessError::AlreadyRunning`](hearth_core::ProcessError::AlreadyRunning)
    /// while the server runs; stop it first or use [`stop_exit`](Self::stop_exit).
    fn exit(&self) -> ProcessResult<()>;

    // ─── Output ──────────────────────────────────────────────────────────────

    /// Writes one line to the server's stdin.
    async fn execute(&self, command: &str) -> ProcessResult<()>;

    /// Sends `text` to one player.
    async fn tell(&self, player: &str, text: &str) -> ProcessResult<()> {
        self.execute(&tellraw(player, text)).await
    }

    /// Broadcasts `text` to every player.
    async fn say(&self, text: &str) -> ProcessResult<()> {
        self.execute(&tellraw("@a", text)).await
    }

    /// Runs `command` through the command tree on behalf of `plugin`.
    ///
    /// The command is queued behind everything already waiting for dispatch
    /// and runs with the plugin's permission level. Replies go to the log.
    async fn execute_command(&self, plugin: &str, command: &str);

    /// Replies to a command source.
    async fn reply(&self, source: &CommandSource, text: &str) -> ProcessResult<()> {
        source.reply(text);
        Ok(())
    }

    // ─── Plugins ─────────────────────────────────────────────────────────────

    async fn load_plugin(&self, descriptor: PluginDescriptor) -> PluginResult<LifecycleReport>;

    async fn unload_plugin(&self, id: &str) -> PluginResult<LifecycleReport>;

    async fn reload_plugin(&self, id: &str) -> PluginResult<LifecycleReport>;

    async fn enable_plugin(&self, id: &str) -> PluginResult<LifecycleReport>;

    async fn disable_plugin(&self, id: &str) -> PluginResult<LifecycleReport>;

    /// Re-enumerates the plugin source: new plugins load, vanished ones
    /// unload.
    async fn refresh_plugins(&self) -> PluginResult<LifecycleReport>;

    /// The live instance of a plugin, for plugins that expose an API to
    /// others. `downcast_ref` on the result reaches the concrete type.
    fn plugin_instance(&self, id: &str) -> Option<Arc<dyn Plugin>>;

    /// Every known plugin with its state, in load order.
    fn plugin_list(&self) -> Vec<(PluginMetadata, PluginState)>;

    // ─── Events ──────────────────────────────────────────────────────────────

    /// Publishes a custom event on the bus.
    async fn dispatch_event(
        &self,
        kind: EventKind,
        event: BoxedEvent,
        mode: DispatchMode,
    ) -> DispatchReport;

    // ─── Permissions ─────────────────────────────────────────────────────────

    fn permission_level(&self, player: &str) -> PermissionLevel;

    fn set_permission_level(&self, player: &str, level: PermissionLevel);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use hearth_core::{ProcessError, SourceKind};
    use parking_lot::Mutex;

    use super::*;
    use crate::error::PluginError;

    /// Records stdin writes; everything else is inert.
    #[derive(Default)]
    struct Recorder {
        written: Mutex<Vec<String>>,
        commands: Mutex<Vec<(String, String)>>,
        running: AtomicBool,
        exits: AtomicUsize,
    }

    #[async_trait]
    impl ServerControl for Recorder {
        async fn start(&self) -> ProcessResult<()> {
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> ProcessResult<()> {
            self.running.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn restart(&self) -> ProcessResult<()> {
            self.stop().await?;
            self.start().await
        }

        fn is_server_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        fn is_server_startup(&self) -> bool {
            false
        }

        fn server_pid(&self) -> Option<u32> {
            None
        }

        async fn wait_for_start(&self) {}

        async fn stop_exit(&self) -> ProcessResult<()> {
            let stopped = self.stop().await;
            self.exits.fetch_add(1, Ordering::SeqCst);
            stopped
        }

        fn exit(&self) -> ProcessResult<()> {
            if self.is_server_running() {
                return Err(ProcessError::AlreadyRunning);
            }
            self.exits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn execute_command(&self, plugin: &str, command: &str) {
            self.commands
                .lock()
                .push((plugin.to_string(), command.to_string()));
        }

        async fn execute(&self, command: &str) -> ProcessResult<()> {
            if !self.is_server_running() {
                return Err(ProcessError::NotRunning);
            }
            self.written.lock().push(command.to_string());
            Ok(())
        }

        async fn load_plugin(&self, d: PluginDescriptor) -> PluginResult<LifecycleReport> {
            Err(PluginError::NotFound(d.id.to_string()))
        }

        async fn unload_plugin(&self, id: &str) -> PluginResult<LifecycleReport> {
            Err(PluginError::NotLoaded(id.to_string()))
        }

        async fn reload_plugin(&self, id: &str) -> PluginResult<LifecycleReport> {
            Err(PluginError::NotLoaded(id.to_string()))
        }

        async fn enable_plugin(&self, id: &str) -> PluginResult<LifecycleReport> {
            Err(PluginError::NotFound(id.to_string()))
        }

        async fn disable_plugin(&self, id: &str) -> PluginResult<LifecycleReport> {
            Err(PluginError::NotLoaded(id.to_string()))
        }

        async fn refresh_plugins(&self) -> PluginResult<LifecycleReport> {
            Err(PluginError::NoSource)
        }

        fn plugin_instance(&self, _id: &str) -> Option<Arc<dyn Plugin>> {
            None
        }

        fn plugin_list(&self) -> Vec<(PluginMetadata, PluginState)> {
            Vec::new()
        }

        async fn dispatch_event(
            &self,
            _kind: EventKind,
            _event: BoxedEvent,
            _mode: DispatchMode,
        ) -> DispatchReport {
            DispatchReport::default()
        }

        fn permission_level(&self, _player: &str) -> PermissionLevel {
            PermissionLevel::User
        }

        fn set_permission_level(&self, _player: &str, _level: PermissionLevel) {}
    }

    #[test]
    fn test_tellraw_escapes_text() {
        assert_eq!(
            tellraw("Steve", r#"say "hi" \o/"#),
            r#"tellraw Steve {"text":"say \"hi\" \\o/"}"#
        );
    }

    #[tokio::test]
    async fn test_default_output_helpers() {
        let server = Recorder::default();
        assert!(matches!(
            server.say("hello").await,
            Err(ProcessError::NotRunning)
        ));

        server.start().await.unwrap();
        server.tell("Alex", "psst").await.unwrap();
        server.say("hello").await.unwrap();
        assert_eq!(
            *server.written.lock(),
            vec![
                r#"tellraw Alex {"text":"psst"}"#.to_string(),
                r#"tellraw @a {"text":"hello"}"#.to_string(),
            ]
        );

        let source = CommandSource::new(SourceKind::Console, PermissionLevel::Owner);
        server.reply(&source, "done").await.unwrap();
        assert_eq!(source.replies(), vec!["done"]);
    }

    #[tokio::test]
    async fn test_exit_requires_a_stopped_server() {
        let server = Recorder::default();
        server.start().await.unwrap();
        assert!(matches!(server.exit(), Err(ProcessError::AlreadyRunning)));
        assert_eq!(server.exits.load(Ordering::SeqCst), 0);

        server.stop_exit().await.unwrap();
        assert!(!server.is_server_running());
        assert_eq!(server.exits.load(Ordering::SeqCst), 1);
        server.exit().unwrap();
        assert_eq!(server.exits.load(Ordering::SeqCst), 2);
    }
}
