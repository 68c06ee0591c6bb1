//! # Hearth Core
//!
//! The core engine of the Hearth server supervisor.
//!
//! This crate turns the raw output of a game-server process into typed events
//! and delivers them to listeners:
//!
//! - **Process Bridge**: owns the subprocess and its streams ([`ProcessBridge`])
//! - **Text Classifiers**: per-dialect line parsers ([`TextClassifier`], [`Dialect`])
//! - **Info Reactor**: lines to [`Info`] records and lifecycle events ([`InfoReactor`])
//! - **Event Bus**: prioritized listener dispatch with a watchdog ([`EventBus`])
//! - **Permissions**: levels, resolver contract and [`CommandSource`]
//!
//! ## Data Flow
//!
//! ```text
//! ┌────────────┐ lines ┌─────────────┐ Reaction ┌──────────┐     ┌──────────┐
//! │  Process   │──────▶│    Info     │─────────▶│  Event   │────▶│ Listener │
//! │  Bridge    │       │   Reactor   │          │   Bus    │────▶│ Listener │
//! └────────────┘       └─────────────┘          └──────────┘     └──────────┘
//!       ▲                                                             │
//!       └──────────────────────── write / forward ────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use hearth_core::{Dialect, DispatchMode, EventBus, EventKind, InfoReactor};
//!
//! let reactor = InfoReactor::with_dialect(Dialect::Vanilla);
//! let bus = EventBus::default();
//!
//! bus.subscribe("logger", EventKind::GENERAL_INFO, 1000, |ctx| {
//!     Box::pin(async move {
//!         if let Some(info) = ctx.info() {
//!             println!("{}", info.content());
//!         }
//!         Ok(())
//!     })
//! });
//!
//! let reaction = reactor.react("[12:00:00] [Server thread/INFO]: <Steve> hi");
//! for (kind, event) in reaction.events {
//!     bus.publish(&kind, event, DispatchMode::Blocking).await;
//! }
//! bus.publish(&EventKind::GENERAL_INFO, reaction.info.into(), DispatchMode::Blocking).await;
//! ```

pub mod bus;
pub mod classifier;
pub mod error;
pub mod event;
pub mod info;
pub mod permission;
pub mod process;
pub mod reactor;
pub mod source;

pub use bus::{
    DEFAULT_DETACHED_CONCURRENCY, DEFAULT_LISTENER_PRIORITY, DEFAULT_LISTENER_TIMEOUT,
    DispatchMode, DispatchReport, EventBus, EventContext, ListenerFn, ListenerId,
};
pub use classifier::{Dialect, DialectClassifier, TextClassifier, UnknownDialect};
pub use error::{BoxError, ListenerError, ProcessError, ProcessResult, panic_message};
pub use event::{BoxedEvent, Event, EventKind, LifecycleEvent, PlayerEvent, ServerPhase};
pub use info::{Info, InfoSource, ParsedFields};
pub use permission::{InvalidPermissionLevel, PermissionLevel, PermissionResolver};
pub use process::{KILL_GRACE, ProcessBridge, ProcessConfig, ProcessExit};
pub use reactor::{InfoReactor, Reaction};
pub use source::{CommandSource, ReplySink, SourceKind};

/// Re-exported so plugins can name the listener future type.
pub use futures::future::BoxFuture;

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        BoxError, BoxFuture, BoxedEvent, CommandSource, Dialect, DispatchMode, Event,
        EventContext, EventKind, Info, LifecycleEvent, PermissionLevel, PlayerEvent,
        ServerPhase, SourceKind,
    };
}
