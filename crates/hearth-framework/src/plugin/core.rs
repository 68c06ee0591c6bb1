use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use hearth_core::BoxError;

use super::context::PluginContext;

// ─── AsAny ────────────────────────────────────────────────────────────────────

/// Upcast to `&dyn Any`, so plugins can be downcast to their concrete type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ─── Plugin ───────────────────────────────────────────────────────────────────

/// A live plugin instance.
///
/// Every hook has a no-op default. Hook failures and panics are caught by
/// the manager: the plugin is marked [`PluginState::Failed`] and its
/// registrations are removed.
///
/// # Concurrency
///
/// `Plugin` is `Send + Sync`.  Use interior mutability (e.g. `Arc<Mutex<T>>`)
/// for state that changes across events.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Default)]
/// struct Counter(Arc<AtomicUsize>);
///
/// #[async_trait]
/// impl Plugin for Counter {
///     async fn on_load(&self, ctx: &PluginContext, previous: Option<Arc<dyn Plugin>>) -> Result<(), BoxError> {
///         if let Some(old) = previous.as_deref().and_then(|p| p.downcast_ref::<Counter>()) {
///             self.0.store(old.0.load(Ordering::SeqCst), Ordering::SeqCst);
///         }
///         let count = self.0.clone();
///         ctx.register_event_listener(EventKind::PLAYER_JOINED, 1000, move |_| {
///             count.fetch_add(1, Ordering::SeqCst);
///             async { Ok(()) }
///         })?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Plugin: AsAny + Send + Sync {
    /// Called first. Register listeners, commands and help messages here.
    ///
    /// On reload, `previous` is the instance being replaced.
    async fn on_load(
        &self,
        _ctx: &PluginContext,
        _previous: Option<Arc<dyn Plugin>>,
    ) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called once every plugin of the batch has loaded. Registrations go
    /// live when this returns `Ok`.
    async fn on_start(&self, _ctx: &PluginContext) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called before the plugin's registrations are removed.
    async fn on_unload(&self, _ctx: &PluginContext) -> Result<(), BoxError> {
        Ok(())
    }
}

impl dyn Plugin {
    pub fn downcast_ref<T: Plugin>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: Plugin>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

impl fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn Plugin")
    }
}

// ─── PluginState ──────────────────────────────────────────────────────────────

/// Lifecycle state of a plugin.
///
/// ```text
/// Uninitialized ──on_load──▶ Loaded ──on_start──▶ Started
///       │                      │                     │
///       └──── hook fails ──────┴─────▶ Failed        ▼
///                                         Unloading ──▶ Unloaded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PluginState {
    #[default]
    Uninitialized,
    Loaded,
    Started,
    Unloading,
    Unloaded,
    Failed,
}

impl PluginState {
    /// Loaded or started: the plugin counts as present.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Loaded | Self::Started)
    }

    /// Still accepting command and help registrations.
    pub(crate) fn is_registering(self) -> bool {
        matches!(self, Self::Uninitialized | Self::Loaded)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Loaded => "loaded",
            Self::Started => "started",
            Self::Unloading => "unloading",
            Self::Unloaded => "unloaded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}
