//! Configuration validation utilities.

use hearth_core::Dialect;
use hearth_framework::plugin::is_valid_plugin_id;

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    CommandsConfig, DispatchConfig, HearthConfig, LogOutput, LoggingConfig, PluginsConfig,
    ServerConfig,
};

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validates the entire configuration.
pub fn validate_config(config: &HearthConfig) -> ConfigResult<()> {
    validate_server_config(&config.server)?;
    validate_dispatch_config(&config.dispatch)?;
    validate_commands_config(&config.commands)?;
    validate_plugins_config(&config.plugins)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_server_config(server: &ServerConfig) -> ConfigResult<()> {
    if server.command.trim().is_empty() {
        return Err(ConfigError::missing_field("server.command"));
    }

    server
        .dialect
        .parse::<Dialect>()
        .map_err(|e| ConfigError::validation(e.to_string()))?;

    if server.stop_timeout_secs == 0 {
        return Err(ConfigError::validation(
            "server.stop_timeout_secs must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_dispatch_config(dispatch: &DispatchConfig) -> ConfigResult<()> {
    let positive = [
        ("dispatch.listener_timeout_ms", dispatch.listener_timeout_ms),
        ("dispatch.queue_size", dispatch.queue_size as u64),
        (
            "dispatch.detached_concurrency",
            dispatch.detached_concurrency as u64,
        ),
        (
            "dispatch.queue_full_warn_interval_secs",
            dispatch.queue_full_warn_interval_secs,
        ),
    ];
    for (field, value) in positive {
        if value == 0 {
            return Err(ConfigError::validation(format!(
                "{field} must be greater than 0"
            )));
        }
    }
    Ok(())
}

fn validate_commands_config(commands: &CommandsConfig) -> ConfigResult<()> {
    if commands.prefixes.is_empty() {
        return Err(ConfigError::validation(
            "commands.prefixes must contain at least one prefix",
        ));
    }
    for prefix in &commands.prefixes {
        if prefix.is_empty() || prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::validation(format!(
                "Invalid command prefix '{prefix}': must be non-empty without whitespace"
            )));
        }
    }
    Ok(())
}

fn validate_plugins_config(plugins: &PluginsConfig) -> ConfigResult<()> {
    if let Some(id) = plugins.disabled.iter().find(|id| !is_valid_plugin_id(id)) {
        return Err(ConfigError::validation(format!(
            "Invalid plugin id in plugins.disabled: '{id}'"
        )));
    }
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    validate_log_level("logging.level", &logging.level)?;
    for (target, level) in &logging.filters {
        validate_log_level(&format!("logging.filters.{target}"), level)?;
    }
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    Ok(())
}

fn validate_log_level(field: &str, level: &str) -> ConfigResult<()> {
    if !VALID_LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
        return Err(ConfigError::validation(format!(
            "Invalid log level for {field}: {level}. Valid values are: {VALID_LOG_LEVELS:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = HearthConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_empty_command() {
        let mut config = HearthConfig::default();
        config.server.command = "  ".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn test_validate_unknown_dialect() {
        let mut config = HearthConfig::default();
        config.server.dialect = "paper".to_string();
        assert!(validate_config(&config).is_err());

        config.server.dialect = "Bukkit".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_values() {
        let mut config = HearthConfig::default();
        config.dispatch.queue_size = 0;
        assert!(validate_config(&config).is_err());

        let mut config = HearthConfig::default();
        config.dispatch.listener_timeout_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = HearthConfig::default();
        config.dispatch.detached_concurrency = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_prefixes() {
        let mut config = HearthConfig::default();
        config.commands.prefixes = vec!["!! ".to_string()];
        assert!(validate_config(&config).is_err());

        config.commands.prefixes = vec![];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = HearthConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = HearthConfig::default();
        config
            .logging
            .filters
            .insert("hearth_core".to_string(), "loud".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_disabled_ids() {
        let mut config = HearthConfig::default();
        config.plugins.disabled = vec!["Not A Plugin".to_string()];
        assert!(validate_config(&config).is_err());

        config.plugins.disabled = vec!["quiet_plugin".to_string()];
        assert!(validate_config(&config).is_ok());
    }
}
