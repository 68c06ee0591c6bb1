//! Error types for the Hearth framework.
//!
//! Command tree errors live in [`crate::command`]; this module holds the
//! plugin lifecycle errors.

use thiserror::Error;

use crate::command::NodeError;

/// Errors raised by the plugin manager and plugin contexts.
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    /// A plugin with this id is already live.
    #[error("plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    /// No live plugin with this id.
    #[error("plugin '{0}' is not loaded")]
    NotLoaded(String),

    /// No descriptor with this id in the plugin source.
    #[error("plugin '{0}' was not found")]
    NotFound(String),

    /// A declared dependency is missing or has the wrong version.
    #[error("dependency of '{plugin}' not satisfied: {reason}")]
    DependencyUnsatisfied {
        /// The plugin that cannot load.
        plugin: String,
        reason: String,
    },

    /// Unloading would orphan these live dependents.
    #[error("plugin '{id}' is required by: {}", dependents.join(", "))]
    DependentsStillLoaded {
        id: String,
        dependents: Vec<String>,
    },

    /// A lifecycle hook returned an error or panicked.
    #[error("plugin '{id}' failed in {hook}: {reason}")]
    HookFailed {
        id: String,
        hook: &'static str,
        reason: String,
    },

    /// A lifecycle operation was requested from inside a lifecycle hook.
    #[error("plugin lifecycle operations cannot be nested inside a lifecycle hook")]
    ReentrantLifecycle,

    /// The descriptor was built against another plugin API.
    #[error("plugin '{id}' targets plugin API {version}, which this host does not support")]
    IncompatibleApi { id: String, version: String },

    /// Plugin ids are `[a-z0-9_]{1,64}`.
    #[error("invalid plugin id '{0}'")]
    InvalidId(String),

    /// The plugin is in the disabled set.
    #[error("plugin '{0}' is disabled")]
    Disabled(String),

    /// Nothing was loaded from a plugin source yet.
    #[error("no plugin source has been loaded")]
    NoSource,

    /// No server is attached to the plugin context.
    #[error("server is not available")]
    ServerUnavailable,

    /// Commands and help messages can only be registered before the plugin starts.
    #[error("plugin '{0}' can no longer register commands or help messages")]
    RegistrationClosed(String),

    /// A command node failed validation.
    #[error(transparent)]
    Command(#[from] NodeError),
}

impl PluginError {
    /// Creates a [`PluginError::DependencyUnsatisfied`].
    pub fn dependency(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DependencyUnsatisfied {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }

    /// Creates a [`PluginError::HookFailed`].
    pub fn hook(id: impl Into<String>, hook: &'static str, reason: impl Into<String>) -> Self {
        Self::HookFailed {
            id: id.into(),
            hook,
            reason: reason.into(),
        }
    }
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;
