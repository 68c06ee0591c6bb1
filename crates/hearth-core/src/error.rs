//! Unified error types for the Hearth core.
//!
//! Command and plugin errors are defined in hearth-framework; configuration
//! and runtime errors in hearth-runtime.

use std::time::Duration;

use thiserror::Error;

/// Error type returned by listener callbacks and plugin hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Process Errors
// =============================================================================

/// Errors raised by the [`ProcessBridge`](crate::ProcessBridge).
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The executable or working directory is invalid.
    #[error("failed to start '{command}': {source}")]
    StartFailed {
        /// The command that was spawned.
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The executable does not exist.
    #[error("server binary '{command}' not found")]
    BinaryNotFound {
        /// The command that was spawned.
        command: String,
    },

    /// `start` was called while a process is alive.
    #[error("server process is already running")]
    AlreadyRunning,

    /// The operation needs a live process.
    #[error("server process is not running")]
    NotRunning,

    /// The process survived the termination signal and the forced kill.
    #[error("server process (pid {pid:?}) is still running after forced kill")]
    StillRunning {
        /// Process id of the survivor, when the OS reported one.
        pid: Option<u32>,
    },

    /// The process stdin was closed.
    #[error("server stdin is closed")]
    StdinClosed,

    /// I/O error on one of the process streams.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// Maps a spawn failure to `BinaryNotFound` or `StartFailed`.
    pub fn spawn(command: impl Into<String>, err: std::io::Error) -> Self {
        let command = command.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::BinaryNotFound { command }
        } else {
            Self::StartFailed {
                command,
                source: err,
            }
        }
    }

    /// Returns `true` for the start failure family.
    pub fn is_start_error(&self) -> bool {
        matches!(self, Self::StartFailed { .. } | Self::BinaryNotFound { .. })
    }
}

// =============================================================================
// Listener Errors
// =============================================================================

/// A failure recorded for one listener during a dispatch.
#[derive(Debug, Clone, Error)]
pub enum ListenerError {
    /// The callback returned an error or panicked.
    #[error("listener of plugin '{plugin}' failed on {kind}: {reason}")]
    Failed {
        plugin: String,
        kind: String,
        reason: String,
    },

    /// The callback exceeded the watchdog and was abandoned.
    #[error("listener of plugin '{plugin}' timed out on {kind} after {timeout:?}")]
    TimedOut {
        plugin: String,
        kind: String,
        timeout: Duration,
    },
}

impl ListenerError {
    /// Returns the owning plugin id.
    pub fn plugin(&self) -> &str {
        match self {
            Self::Failed { plugin, .. } | Self::TimedOut { plugin, .. } => plugin,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Renders a panic payload caught by `catch_unwind` or a `JoinError`.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for process operations.
pub type ProcessResult<T> = Result<T, ProcessError>;
