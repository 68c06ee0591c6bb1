//! Configuration schema definitions.
//!
//! Every section has serde defaults, so an empty `hearth.toml` is a valid
//! configuration:
//!
//! ```toml
//! [server]
//! command = "java"
//! args = ["-Xmx2G", "-jar", "server.jar", "nogui"]
//! working_dir = "server"
//! dialect = "vanilla"
//!
//! [commands]
//! prefixes = ["!!"]
//!
//! [permission]
//! default_level = "user"
//! players = { Steve = "admin" }
//!
//! [plugins]
//! disabled = ["noisy_plugin"]
//!
//! [plugins.settings.greeter]
//! message = "Welcome back"
//!
//! [logging]
//! level = "info"
//! format = "compact"
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use hearth_core::PermissionLevel;
use serde::{Deserialize, Serialize};

/// Root configuration structure for Hearth.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HearthConfig {
    /// The supervised server process.
    #[serde(default)]
    pub server: ServerConfig,

    /// Event dispatch tuning.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Command recognition.
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Permission levels.
    #[serde(default)]
    pub permission: PermissionConfig,

    /// Plugin loading and per-plugin settings.
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// =============================================================================
// Server
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Executable that starts the server.
    #[serde(default = "default_command")]
    pub command: String,

    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Directory the server runs in; the daemon's own directory if unset.
    #[serde(default = "default_working_dir")]
    pub working_dir: Option<PathBuf>,

    /// Output dialect used to classify server lines.
    #[serde(default = "default_dialect")]
    pub dialect: String,

    /// Line written to stdin to ask the server to stop.
    #[serde(default = "default_stop_command")]
    pub stop_command: String,

    /// How long to wait after the stop command before terminating.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Start the server when the runtime starts.
    #[serde(default = "default_true")]
    pub auto_start: bool,

    /// Shut the daemon down when the server exits.
    #[serde(default = "default_true")]
    pub exit_with_server: bool,
}

impl ServerConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            working_dir: default_working_dir(),
            dialect: default_dialect(),
            stop_command: default_stop_command(),
            stop_timeout_secs: default_stop_timeout(),
            auto_start: true,
            exit_with_server: true,
        }
    }
}

fn default_command() -> String {
    "java".to_string()
}

fn default_args() -> Vec<String> {
    ["-Xms1G", "-Xmx2G", "-jar", "server.jar", "nogui"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_working_dir() -> Option<PathBuf> {
    Some(PathBuf::from("server"))
}

fn default_dialect() -> String {
    "vanilla".to_string()
}

fn default_stop_command() -> String {
    "stop".to_string()
}

fn default_stop_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Dispatch
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Watchdog for each blocking listener invocation.
    #[serde(default = "default_listener_timeout")]
    pub listener_timeout_ms: u64,

    /// Capacity of the queue between the reactor and the dispatcher.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Detached dispatch chains allowed to run at once.
    #[serde(default = "default_detached_concurrency")]
    pub detached_concurrency: usize,

    /// Minimum interval between two "queue full" warnings.
    #[serde(default = "default_warn_interval")]
    pub queue_full_warn_interval_secs: u64,
}

impl DispatchConfig {
    pub fn listener_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_timeout_ms)
    }

    pub fn queue_full_warn_interval(&self) -> Duration {
        Duration::from_secs(self.queue_full_warn_interval_secs)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            listener_timeout_ms: default_listener_timeout(),
            queue_size: default_queue_size(),
            detached_concurrency: default_detached_concurrency(),
            queue_full_warn_interval_secs: default_warn_interval(),
        }
    }
}

fn default_listener_timeout() -> u64 {
    10_000
}

fn default_queue_size() -> usize {
    2048
}

fn default_detached_concurrency() -> usize {
    4
}

fn default_warn_interval() -> u64 {
    5
}

// =============================================================================
// Commands / Permission / Plugins
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Text starting with one of these is handled as a command.
    #[serde(default = "default_prefixes")]
    pub prefixes: Vec<String>,
}

impl CommandsConfig {
    /// Whether `text` is addressed to the command tree.
    ///
    /// Root literals carry the prefix themselves (`!!help`), so the text is
    /// matched as a whole.
    pub fn is_command(&self, text: &str) -> bool {
        self.prefixes
            .iter()
            .any(|prefix| text.starts_with(prefix.as_str()))
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            prefixes: default_prefixes(),
        }
    }
}

fn default_prefixes() -> Vec<String> {
    vec!["!!".to_string()]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionConfig {
    /// Level of players without an explicit entry.
    #[serde(default)]
    pub default_level: PermissionLevel,

    /// Explicit levels by player name.
    #[serde(default)]
    pub players: HashMap<String, PermissionLevel>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Ids that are never loaded until enabled again.
    #[serde(default)]
    pub disabled: Vec<String>,

    /// Per-plugin sections, keyed by plugin id.
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
}

// =============================================================================
// Logging
// =============================================================================

/// Logging output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `full` otherwise.
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Rotation period of the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global level: trace, debug, info, warn or error.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file used with `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Rotated files to keep; 0 keeps all of them.
    #[serde(default)]
    pub max_files: usize,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include file names and line numbers.
    #[serde(default)]
    pub file_location: bool,

    /// Per-target levels, e.g. `hearth_core = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            rotation: LogRotation::default(),
            max_files: 0,
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            filters: HashMap::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
