//! # Hearth
//!
//! A supervisor daemon for game servers.
//!
//! ## Overview
//!
//! Hearth starts a game server as a child process, reads its console output
//! and turns every line into typed events. Plugins listen to those events,
//! register chat and console commands, and drive the server through its
//! stdin.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐ lines ┌─────────┐      ┌────────────┐     ┌──────────────────────────┐
//! │  Server  │──────▶│ Reactor │─────▶│  Dispatch  │────▶│ Event Bus ─▶ listeners   │
//! │ process  │       │         │      │    task    │────▶│ Command Tree ─▶ commands │
//! └──────────┘       └─────────┘      └────────────┘     └──────────────────────────┘
//!      ▲                                    │                          │
//!      └────────── console input ───────────┴──── tellraw / execute ───┘
//! ```
//!
//! - **Runtime**: loads configuration, supervises the process, owns the tasks
//! - **Reactor**: classifies lines per server dialect (vanilla, bukkit, forge, ...)
//! - **Event Bus**: prioritized listeners with a watchdog
//! - **Command Tree**: literal and argument nodes with permission checks
//! - **Plugins**: lifecycle hooks, dependency ordering and exact teardown
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hearth::prelude::*;
//!
//! #[derive(Default)]
//! struct Ping;
//!
//! #[async_trait]
//! impl Plugin for Ping {
//!     async fn on_load(&self, ctx: &PluginContext, _: Option<Arc<dyn Plugin>>) -> Result<(), BoxError> {
//!         ctx.register_command(CommandNode::literal("!!ping").runs(|c| async move {
//!             c.reply("pong");
//!             Ok(())
//!         }))?;
//!         Ok(())
//!     }
//! }
//!
//! hearth::export_plugin! {
//!     static PING: PluginDescriptor = define_plugin!(Ping { id: "ping" });
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     HearthRuntime::new().run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: read `hearth.toml` (default)
//! - `yaml-config`: read `hearth.yaml`
//! - `json-log`: JSON log format

pub use hearth_core as core;
pub use hearth_framework as framework;
pub use hearth_runtime as runtime;

pub use hearth_framework::{define_plugin, export_plugin};

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use hearth::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    pub use async_trait::async_trait;

    // Runtime - main entry point
    pub use hearth_runtime::{HearthConfig, HearthRuntime};

    // Plugin system
    pub use hearth_framework::plugin::{Plugin, PluginContext, PluginDescriptor, PluginState};
    pub use hearth_framework::{ServerControl, ServerHandle, define_plugin};

    // Commands
    pub use hearth_framework::command::{CommandContext, CommandNode};

    // Events, infos and permissions
    pub use hearth_core::{
        BoxError, BoxedEvent, CommandSource, DispatchMode, Event, EventContext, EventKind, Info,
        LifecycleEvent, PermissionLevel, PlayerEvent, SourceKind,
    };
}
