//! Plugin system for the Hearth supervisor.
//!
//! # Architecture
//!
//! A [`PluginDescriptor`] is the *static, `Copy` handle* to a plugin: it
//! carries metadata strings and a factory function pointer. The
//! [`PluginManager`](crate::manager::PluginManager) calls
//! [`PluginDescriptor::instantiate`] to create the live [`Plugin`] and hands
//! it a [`PluginContext`] through which it registers:
//!
//! - **event listeners** on the [`EventBus`](hearth_core::EventBus),
//! - **commands** for the [`CommandTree`](crate::command::CommandTree),
//! - **help messages** shown by `!!help`.
//!
//! Everything registered through a context is owned by the plugin and is
//! removed exactly when the plugin unloads.
//!
//! ```text
//!  PluginSource ──descriptors──▶ PluginManager ──instantiate──▶ dyn Plugin
//!                                      │                          │
//!                                      │ PluginContext ◀──────────┘ on_load / on_start
//!                                      ▼
//!                       EventBus · CommandTree · help
//! ```
//!
//! # Quick start
//!
//! ```rust,ignore
//! use hearth::prelude::*;
//!
//! #[derive(Default)]
//! struct Greeter;
//!
//! #[async_trait]
//! impl Plugin for Greeter {
//!     async fn on_load(&self, ctx: &PluginContext, _: Option<Arc<dyn Plugin>>) -> Result<(), BoxError> {
//!         ctx.register_event_listener(EventKind::PLAYER_JOINED, 1000, |event| async move {
//!             if let Some(joined) = event.downcast::<PlayerEvent>() {
//!                 tracing::info!(player = %joined.player, "welcome");
//!             }
//!             Ok(())
//!         })?;
//!         Ok(())
//!     }
//! }
//!
//! hearth::export_plugin! {
//!     pub static GREETER: PluginDescriptor = define_plugin!(Greeter { id: "greeter" });
//! }
//! ```
//!
//! # Configuration
//!
//! Each plugin's section is read from `hearth.toml` under
//! `plugins.settings.<id>` and deserialised on demand with
//! [`PluginContext::config`]:
//!
//! ```toml
//! [plugins.settings.greeter]
//! message = "Welcome back"
//! ```

mod catalog;
mod context;
mod core;
mod descriptor;
mod macros;
mod metadata;
mod registry;

pub use catalog::{LinkedPlugins, PLUGINS, PluginCatalog, PluginSource, StaticPlugins};
pub use context::PluginContext;
pub use self::core::{AsAny, Plugin, PluginState};
pub use descriptor::{HEARTH_PLUGIN_API_VERSION, PluginDescriptor};
pub use metadata::{HOST_ID, PluginDependency, PluginMetadata, host_version, is_valid_plugin_id};
pub use registry::{HelpMessage, visible_help};
