//! Event system for the Hearth supervisor.
//!
//! This module provides the core event infrastructure:
//!
//! - [`EventKind`] - the key listeners subscribe to
//! - [`Event`] - base trait for every payload carried by the bus
//! - [`BoxedEvent`] - a shared, type-erased payload handed to listeners
//! - built-in payloads for server lifecycle and player presence
//!
//! A single payload can be published under several kinds. The reactor
//! publishes the same [`Info`](crate::Info) as `GENERAL_INFO` and, for player
//! chat and console input, again as `USER_INFO`. Because [`BoxedEvent`] is an
//! `Arc`, every listener of every kind sees the same instance:
//!
//! ```rust,ignore
//! bus.subscribe("my_plugin", EventKind::USER_INFO, 1000, |ctx| {
//!     Box::pin(async move {
//!         if let Some(info) = ctx.event().downcast_ref::<Info>() {
//!             info.cancel();
//!         }
//!         Ok(())
//!     })
//! });
//! ```

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::info::Info;

// ============================================================================
// Event Kinds
// ============================================================================

/// Identifier of an event stream on the bus.
///
/// Built-in kinds live under the `hearth.` namespace. Plugins may define
/// their own kinds with [`EventKind::new`]; by convention those are prefixed
/// with the plugin id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKind(Cow<'static, str>);

impl EventKind {
    /// Every classified (or raw) line of server output, and every injected line.
    pub const GENERAL_INFO: Self = Self::from_static("hearth.general_info");
    /// Player chat and console input.
    pub const USER_INFO: Self = Self::from_static("hearth.user_info");
    /// The server process was spawned.
    pub const SERVER_START: Self = Self::from_static("hearth.server_start");
    /// The server printed its "started" marker.
    pub const SERVER_STARTUP: Self = Self::from_static("hearth.server_startup");
    /// The server printed its "stopping" marker.
    pub const SERVER_STOPPING: Self = Self::from_static("hearth.server_stopping");
    /// The server process exited.
    pub const SERVER_STOP: Self = Self::from_static("hearth.server_stop");
    /// A player joined the server.
    pub const PLAYER_JOINED: Self = Self::from_static("hearth.player_joined");
    /// A player left the server.
    pub const PLAYER_LEFT: Self = Self::from_static("hearth.player_left");
    /// A plugin reached the started state.
    pub const PLUGIN_LOADED: Self = Self::from_static("hearth.plugin_loaded");
    /// A plugin was unloaded.
    pub const PLUGIN_UNLOADED: Self = Self::from_static("hearth.plugin_unloaded");
    /// A command executor finished (or a command failed to match).
    pub const COMMAND_EXECUTED: Self = Self::from_static("hearth.command_executed");

    /// Creates a kind from a static identifier.
    pub const fn from_static(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }

    /// Creates a kind from an owned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(Cow::Owned(id.into()))
    }

    /// Returns the identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for kinds emitted by the supervisor itself.
    pub fn is_builtin(&self) -> bool {
        self.0.starts_with("hearth.")
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for EventKind {
    fn from(id: &'static str) -> Self {
        Self::from_static(id)
    }
}

// ============================================================================
// Core Event Trait
// ============================================================================

/// The base trait for every payload carried by the event bus.
///
/// Payloads are type-erased behind [`BoxedEvent`] and recovered with
/// [`BoxedEvent::downcast_ref`].
pub trait Event: Any + Send + Sync + fmt::Debug {
    /// Returns a reference to self as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Returns `true` once a listener has cancelled this payload.
    ///
    /// The bus checks this between listener invocations and stops delivering
    /// a cancelled payload. Only [`Info`] is cancellable by default.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A shared, type-erased event payload.
#[derive(Clone)]
pub struct BoxedEvent(Arc<dyn Event>);

impl BoxedEvent {
    /// Wraps a payload.
    pub fn new<E: Event>(event: E) -> Self {
        Self(Arc::new(event))
    }

    /// Wraps an already shared payload without copying it.
    pub fn from_arc(event: Arc<dyn Event>) -> Self {
        Self(event)
    }

    /// Attempts to view the payload as a concrete type.
    pub fn downcast_ref<T: Event>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    /// Returns `true` if the payload is of type `T`.
    pub fn is<T: Event>(&self) -> bool {
        self.0.as_any().is::<T>()
    }

    /// Returns `true` if both handles point at the same payload.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for BoxedEvent {
    type Target = dyn Event;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl fmt::Debug for BoxedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl From<Arc<Info>> for BoxedEvent {
    fn from(info: Arc<Info>) -> Self {
        Self(info)
    }
}

// ============================================================================
// Built-in Payloads
// ============================================================================

/// Server phase tracked by the reactor and the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerPhase {
    /// No process is running.
    #[default]
    Stopped,
    /// The process is running but has not printed its started marker yet.
    Starting,
    /// The started marker was seen.
    Started,
    /// The stopping marker was seen; the process has not exited yet.
    Stopping,
}

impl fmt::Display for ServerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
        })
    }
}

/// Payload of the `SERVER_*` kinds.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    /// Phase entered by this transition.
    pub phase: ServerPhase,
    /// The output line that triggered the transition, if any.
    pub trigger: Option<Arc<Info>>,
    /// Exit code of the process, for `SERVER_STOP`.
    pub exit_code: Option<i32>,
}

impl Event for LifecycleEvent {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Payload of `PLAYER_JOINED` and `PLAYER_LEFT`.
#[derive(Debug, Clone)]
pub struct PlayerEvent {
    /// Player name as printed by the server.
    pub player: String,
    /// The line that announced the change.
    pub info: Arc<Info>,
}

impl Event for PlayerEvent {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Custom(u32);

    impl Event for Custom {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_event_kind_builtin_namespace() {
        assert!(EventKind::GENERAL_INFO.is_builtin());
        assert!(!EventKind::new("backup.done").is_builtin());
        assert_eq!(EventKind::from("hearth.user_info"), EventKind::USER_INFO);
    }

    #[test]
    fn test_boxed_event_downcast() {
        let event = BoxedEvent::new(Custom(7));
        assert!(event.is::<Custom>());
        assert_eq!(event.downcast_ref::<Custom>().map(|c| c.0), Some(7));
        assert!(event.downcast_ref::<PlayerEvent>().is_none());
        assert!(!event.is_cancelled());
    }

    #[test]
    fn test_boxed_event_clone_shares_payload() {
        let a = BoxedEvent::new(Custom(1));
        let b = a.clone();
        assert!(a.ptr_eq(&b));
    }
}
