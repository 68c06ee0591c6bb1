//! Configuration for the Hearth runtime.
//!
//! Layered loading with figment (defaults, profile file, main file,
//! `HEARTH_*` environment variables, programmatic merges) and validation of
//! the merged result.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    CommandsConfig, DispatchConfig, HearthConfig, LogFormat, LogOutput, LogRotation,
    LoggingConfig, PermissionConfig, PluginsConfig, ServerConfig, SpanEventConfig,
};
pub use validation::validate_config;
