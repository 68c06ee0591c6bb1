//! Greeter plugin for Hearth.
//!
//! Welcomes players when they join and answers `!!greet`.
//!
//! # Commands
//!
//! | Command | Level | Effect |
//! |---------|-------|--------|
//! | `!!greet` | user | Greets the invoker |
//! | `!!greet <name>` | user | Greets someone else |
//! | `!!greet count` | helper | Players welcomed since the server started |
//!
//! Configure the message via `hearth.toml`:
//!
//! ```toml
//! [plugins.settings.greeter]
//! message = "Welcome back"
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use hearth::prelude::*;
use serde::Deserialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GreeterConfig {
    /// Sent to every player who joins.
    pub message: String,
    /// Also announce joins to everyone.
    pub broadcast: bool,
}

impl Default for GreeterConfig {
    fn default() -> Self {
        Self {
            message: "Welcome".to_string(),
            broadcast: false,
        }
    }
}

/// Counts welcomed players; the count survives a reload.
#[derive(Default)]
pub struct Greeter {
    welcomed: Arc<AtomicUsize>,
}

impl Greeter {
    pub fn welcomed(&self) -> usize {
        self.welcomed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Plugin for Greeter {
    async fn on_load(
        &self,
        ctx: &PluginContext,
        previous: Option<Arc<dyn Plugin>>,
    ) -> Result<(), BoxError> {
        if let Some(old) = previous.as_deref().and_then(|p| p.downcast_ref::<Greeter>()) {
            self.welcomed.store(old.welcomed(), Ordering::SeqCst);
            debug!(welcomed = old.welcomed(), "Greeter state handed over");
        }
        let config: GreeterConfig = ctx.config()?;

        let welcomed = self.welcomed.clone();
        let server_ctx = ctx.clone();
        let message = config.message.clone();
        ctx.register_event_listener(EventKind::PLAYER_JOINED, 1000, move |event| {
            let player = event
                .downcast::<PlayerEvent>()
                .map(|joined| joined.player.clone());
            let ctx = server_ctx.clone();
            let message = message.clone();
            let welcomed = welcomed.clone();
            let broadcast = config.broadcast;
            async move {
                let Some(player) = player else {
                    return Ok(());
                };
                welcomed.fetch_add(1, Ordering::SeqCst);
                let server = ctx.server()?;
                server.tell(&player, &format!("{message}, {player}!")).await?;
                if broadcast {
                    server.say(&format!("{player} joined the game")).await?;
                }
                Ok(())
            }
        })?;

        ctx.register_event_listener(EventKind::SERVER_START, 1000, {
            let welcomed = self.welcomed.clone();
            move |_| {
                welcomed.store(0, Ordering::SeqCst);
                async { Ok(()) }
            }
        })?;

        let welcomed = self.welcomed.clone();
        ctx.register_command(
            CommandNode::literal("!!greet")
                .runs(|c| async move {
                    let name = c.source().player().unwrap_or("console").to_string();
                    c.reply(format!("Hello, {name}!"));
                    Ok(())
                })
                .then(
                    CommandNode::literal("count")
                        .permission(PermissionLevel::Helper)
                        .runs(move |c| {
                            let count = welcomed.load(Ordering::SeqCst);
                            async move {
                                c.reply(format!("{count} players welcomed"));
                                Ok(())
                            }
                        }),
                )
                .then(CommandNode::greedy_text("name").runs(|c| async move {
                    let name = c.get_str("name").unwrap_or_default().to_string();
                    c.reply(format!("Hello, {name}!"));
                    Ok(())
                })),
        )?;
        ctx.register_help_message("!!greet", "Say hello", PermissionLevel::User)?;

        info!(message = %config.message, "Greeter loaded");
        Ok(())
    }

    async fn on_unload(&self, _ctx: &PluginContext) -> Result<(), BoxError> {
        if self.welcomed() == 0 {
            warn!("Greeter unloaded before anyone joined");
        }
        Ok(())
    }
}

hearth::export_plugin! {
    /// The greeter plugin.
    pub static GREETER: PluginDescriptor = define_plugin!(Greeter {
        id: "greeter",
        name: "Greeter",
        authors: &["XeF2"],
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: GreeterConfig = serde_json::from_value(serde_json::Value::Null).unwrap();
        assert_eq!(config.message, "Welcome");
        assert!(!config.broadcast);

        let config: GreeterConfig =
            serde_json::from_value(serde_json::json!({ "message": "Hi" })).unwrap();
        assert_eq!(config.message, "Hi");
    }

    #[test]
    fn test_descriptor() {
        assert_eq!(GREETER.id, "greeter");
        assert_eq!(GREETER.version, "0.1.0");
    }
}
