//! Runtime error types.

use hearth_core::ProcessError;
use hearth_framework::PluginError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Loading or validating the configuration failed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Starting or stopping the server process failed.
    #[error("Server process error: {0}")]
    Process(#[from] ProcessError),

    /// A plugin lifecycle operation failed.
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// `run` was called on a runtime that is already running.
    #[error("Runtime is already running")]
    AlreadyRunning,

    /// Installing a signal handler or reading the console failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
