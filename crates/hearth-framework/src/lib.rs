//! # Hearth Framework
//!
//! The plugin-facing layer of the Hearth supervisor.
//!
//! This layer provides:
//! - The command tree: node builders, argument parsers and the matcher
//! - The plugin model: descriptors, lifecycle hooks and contexts
//! - The plugin manager: dependency resolution, reload and exact teardown
//! - The [`ServerControl`](server::ServerControl) contract implemented by the runtime
//!
//! It sits on top of `hearth-core` and leaves configuration, the process and
//! task layout to `hearth-runtime`.

pub mod command;
pub mod error;
pub mod manager;
pub mod plugin;
pub mod server;

pub use error::{PluginError, PluginResult};
pub use manager::{LifecycleReport, PluginEvent, PluginManager};
pub use server::{ServerControl, ServerHandle, tellraw};

#[doc(hidden)]
pub use linkme as __linkme;
