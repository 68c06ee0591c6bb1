//! Hearth Runtime - Orchestration layer for the Hearth server supervisor.
//!
//! This crate provides:
//! - Configuration loading and validation (`HearthConfig`, `ConfigLoader`)
//! - Logging setup from configuration (`LoggingBuilder`)
//! - The server handle plugins talk to (`HearthServer`)
//! - Runtime orchestration (`HearthRuntime`)
//!
//! ```ignore
//! use hearth_runtime::HearthRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Loads hearth.toml, links every exported plugin
//!     let runtime = HearthRuntime::new();
//!
//!     // Run until Ctrl+C or until the server exits
//!     runtime.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Task layout
//!
//! The process bridge reads stdout and stderr on two reader tasks. A reactor
//! task classifies each line and queues it; a single dispatch task publishes
//! events, runs commands and forwards console input. Console input itself is
//! read on a dedicated thread.

pub mod config;
mod dispatch;
pub mod error;
pub mod logging;
pub mod permission;
pub mod runtime;
pub mod server;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, HearthConfig, Profile};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use permission::MemoryPermissionStore;
pub use runtime::{HearthRuntime, RuntimeBuilder};
pub use server::HearthServer;

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides all the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
