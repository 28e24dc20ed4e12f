//! Configuration validation utilities.

use std::path::{Path, PathBuf};

use super::error::{ConfigError, ConfigResult};
use super::schema::{CinderConfig, HandlersConfig, LanguageConfig, LogOutput, LoggingConfig, RateLimitConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &CinderConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_handlers_config(&config.handlers)?;
    validate_ratelimit_config(&config.ratelimit)?;
    validate_language_config(&config.language)?;
    validate_modules_config(config)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    for target in logging.filters.keys() {
        if target.is_empty() || target.contains(char::is_whitespace) {
            return Err(ConfigError::validation(format!(
                "Invalid log filter target: {target:?}"
            )));
        }
    }

    Ok(())
}

/// Rejects enabled handlers that resolve to the same directory.
fn validate_handlers_config(handlers: &HandlersConfig) -> ConfigResult<()> {
    let mut seen: Vec<(&'static str, PathBuf)> = Vec::new();

    for (name, section) in handlers.sections() {
        if !section.enabled {
            continue;
        }
        let Some(directory) = handlers.resolve(section) else {
            continue;
        };
        if directory.as_os_str().is_empty() {
            return Err(ConfigError::validation(format!(
                "handlers.{name}.directory cannot be empty"
            )));
        }
        if let Some((first, _)) = seen.iter().find(|(_, other)| same_directory(other, &directory)) {
            return Err(ConfigError::SharedDirectory {
                first: (*first).to_string(),
                second: name.to_string(),
                directory,
            });
        }
        seen.push((name, directory));
    }

    Ok(())
}

fn validate_ratelimit_config(ratelimit: &RateLimitConfig) -> ConfigResult<()> {
    if ratelimit.sweep_interval_ms == 0 {
        return Err(ConfigError::validation("Sweep interval must be greater than 0"));
    }
    Ok(())
}

fn validate_language_config(language: &LanguageConfig) -> ConfigResult<()> {
    if language.default_namespace.is_empty() {
        return Err(ConfigError::missing_field("language.default_namespace"));
    }
    if language
        .default_namespace
        .contains(|c| matches!(c, ':' | '[' | ']'))
    {
        return Err(ConfigError::validation(format!(
            "Default namespace {:?} cannot contain ':', '[' or ']'",
            language.default_namespace
        )));
    }
    if let Some(fallback) = &language.fallback
        && fallback.is_empty()
    {
        return Err(ConfigError::validation("Fallback language cannot be empty"));
    }
    Ok(())
}

fn validate_modules_config(config: &CinderConfig) -> ConfigResult<()> {
    for (handler, settings) in &config.modules {
        if !settings.is_object() {
            return Err(ConfigError::validation(format!(
                "modules.{handler} must be a table keyed by module path"
            )));
        }
    }
    Ok(())
}

fn same_directory(a: &Path, b: &Path) -> bool {
    a.components().eq(b.components())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_default_config() {
        let config = CinderConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_file_output_requires_path() {
        let mut config = CinderConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { field }) if field == "logging.file_path"
        ));

        config.logging.file_path = Some(PathBuf::from("logs/cinder.log"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_shared_directory_rejected() {
        let mut config = CinderConfig::default();
        config.handlers.root = Some(PathBuf::from("/srv/bot"));
        config.handlers.commands.directory = Some(PathBuf::from("modules"));
        config.handlers.listeners.directory = Some(PathBuf::from("/srv/bot/modules"));

        let result = validate_config(&config);
        assert!(matches!(
            result,
            Err(ConfigError::SharedDirectory { ref first, ref second, .. })
                if first == "commands" && second == "listeners"
        ));

        config.handlers.listeners.enabled = false;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let mut config = CinderConfig::default();
        config.ratelimit.sweep_interval_ms = 0;
        assert!(matches!(validate_config(&config), Err(ConfigError::ValidationError { .. })));
    }

    #[test]
    fn test_language_settings() {
        let mut config = CinderConfig::default();
        config.language.default_namespace = "cmd:x".to_string();
        assert!(validate_config(&config).is_err());

        config.language.default_namespace = "cmd".to_string();
        config.language.fallback = Some(String::new());
        assert!(validate_config(&config).is_err());

        config.language.fallback = Some("en-US".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_module_settings_must_be_tables() {
        let mut config = CinderConfig::default();
        config.modules.insert("commands".to_string(), json!(["ping"]));
        assert!(validate_config(&config).is_err());

        config
            .modules
            .insert("commands".to_string(), json!({ "ping": { "reply": "pong" } }));
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.module_settings("commands")["ping"]["reply"], "pong");
        assert!(config.module_settings("monitors").is_null());
    }
}
