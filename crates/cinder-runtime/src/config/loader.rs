//! Configuration loader using figment.
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: enables `cinder.toml`
//! - `yaml-config`: enables `cinder.yaml` / `cinder.yml`
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Programmatic overrides ([`ConfigLoader::merge`])
//! 3. Profile-specific config file (`cinder.{profile}.toml`)
//! 4. Main config file (`cinder.toml`)
//! 5. Environment variables (`CINDER_*`)
//!
//! # Environment Variable Mapping
//!
//! Environment variables use the `CINDER_` prefix with `__` as separator:
//!
//! - `CINDER_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `CINDER_HANDLERS__COMMANDS__DIRECTORY=cmds` → `handlers.commands.directory = "cmds"`
//! - `CINDER_LANGUAGE__FALLBACK=en-US` → `language.fallback = "en-US"`
//!
//! # Example
//!
//! ```rust,ignore
//! use cinder_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .file("./config/cinder.toml")
//!     .load()?;
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::CinderConfig;
use super::validation::validate_config;

/// Environment variable prefix.
const ENV_PREFIX: &str = "CINDER_";

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    /// Returns the profile name as a string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name; `prod` and `dev` are accepted as short forms.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `CINDER_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var("CINDER_PROFILE")
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration loader with figment-based multi-source support.
pub struct ConfigLoader {
    figment: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader searching the working directory and the user config
    /// directory, with environment variables enabled.
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds the current directory to the search paths.
    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    /// Adds `<user config dir>/cinder` to the search paths.
    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(config_dir) => self.search_path(config_dir.join("cinder")),
            None => self,
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables loading environment variables (default: true).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges configuration programmatically, above the defaults and below
    /// files and the environment.
    pub fn merge(mut self, config: CinderConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads, validates, and returns the configuration.
    pub fn load(self) -> ConfigResult<CinderConfig> {
        let profile = self.profile.clone();
        let figment = self.build_figment()?;

        let config: CinderConfig = figment.extract()?;
        validate_config(&config)?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(CinderConfig::default()));

        let user_figment = std::mem::take(&mut self.figment);
        figment = figment.merge(user_figment);

        if let Some(path) = &self.config_file {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            info!(path = %path.display(), "Loading configuration file");
            figment = Self::merge_config_file(figment, path)?;
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_env {
            trace!("Loading environment variables with {ENV_PREFIX} prefix");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }

        Ok(figment)
    }

    /// Merges a single config file, dispatching on its extension.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("cinder"));
        }
        paths
    }

    /// Searches `search_paths × base_names`, merging the profile variant
    /// before the base file. Stops at the first base file found.
    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn load_format_files<F>(
        &self,
        mut figment: Figment,
        search_paths: &[PathBuf],
        base_names: &[&str],
        merge_fn: F,
    ) -> (Figment, bool)
    where
        F: Fn(Figment, &Path) -> Figment,
    {
        for search_path in search_paths {
            for base_name in base_names {
                let Some((stem, ext)) = base_name.rsplit_once('.') else {
                    continue;
                };

                let profile_path = search_path.join(format!("{stem}.{}.{ext}", self.profile));
                if profile_path.exists() {
                    debug!(path = %profile_path.display(), "Loading profile-specific config");
                    figment = merge_fn(figment, &profile_path);
                }

                let base_path = search_path.join(base_name);
                if base_path.exists() {
                    info!(path = %base_path.display(), "Loading configuration file");
                    figment = merge_fn(figment, &base_path);
                    return (figment, true);
                }
            }
        }
        (figment, false)
    }

    #[allow(unused_mut)]
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        let search_paths = self.resolve_search_paths();
        let mut found = false;

        #[cfg(feature = "toml-config")]
        {
            let (f, ok) = self.load_format_files(figment, &search_paths, &["cinder.toml"], |fig, path| {
                fig.merge(Toml::file(path))
            });
            figment = f;
            found |= ok;
        }

        #[cfg(feature = "yaml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["cinder.yaml", "cinder.yml"],
                |fig, path| fig.merge(Yaml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        if !found {
            warn!("No configuration file found, using defaults");
        }
        figment
    }
}

/// Loads the configuration from the default locations.
pub fn load_config() -> ConfigResult<CinderConfig> {
    ConfigLoader::new().load()
}

/// Loads the configuration from `path`, with environment overrides.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<CinderConfig> {
    ConfigLoader::new().file(path).load()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{LogLevel, LogOutput};
    use cinder_framework::InhibitorPolicy;
    use figment::Jail;

    #[test]
    fn test_default_config() {
        Jail::expect_with(|jail| {
            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .expect("defaults load");

            assert_eq!(config.logging.level.as_str(), "info");
            assert_eq!(config.language.default_namespace, "default");
            assert_eq!(config.inhibitor.policy, InhibitorPolicy::FailOpen);
            assert!(config.handlers.commands.enabled);
            assert!(config.handlers.commands.directory.is_none());
            Ok(())
        });
    }

    #[test]
    #[cfg(feature = "toml-config")]
    fn test_file_then_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "cinder.toml",
                r#"
                [logging]
                level = "warn"

                [handlers]
                root = "bot"

                [handlers.commands]
                directory = "commands"

                [inhibitor]
                policy = "fail-closed"

                [modules.commands."admin/ban"]
                reason = "spam"
                "#,
            )?;
            jail.set_env("CINDER_LOGGING__LEVEL", "debug");
            jail.set_env("CINDER_LANGUAGE__FALLBACK", "en-US");

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .load()
                .expect("config loads");

            assert_eq!(config.logging.level, LogLevel::Debug);
            assert_eq!(config.language.fallback.as_deref(), Some("en-US"));
            assert_eq!(config.inhibitor.policy, InhibitorPolicy::FailClosed);
            assert_eq!(
                config.handlers.resolve(&config.handlers.commands),
                Some(PathBuf::from("bot").join("commands"))
            );
            assert_eq!(config.module_settings("commands")["admin/ban"]["reason"], "spam");
            Ok(())
        });
    }

    #[test]
    #[cfg(feature = "toml-config")]
    fn test_profile_file_is_overridden_by_base_file() {
        Jail::expect_with(|jail| {
            jail.create_file("cinder.production.toml", "[logging]\nlevel = \"error\"\noutput = \"stderr\"\n")?;
            jail.create_file("cinder.toml", "[logging]\nlevel = \"trace\"\n")?;

            let config = ConfigLoader::new()
                .profile("prod")
                .search_path(jail.directory())
                .without_env()
                .load()
                .expect("config loads");

            assert_eq!(config.logging.level, LogLevel::Trace);
            assert_eq!(config.logging.output, LogOutput::Stderr);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_config_is_rejected_at_load() {
        Jail::expect_with(|jail| {
            jail.set_env("CINDER_RATELIMIT__SWEEP_INTERVAL_MS", "0");

            let result = ConfigLoader::new().search_path(jail.directory()).load();
            assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
            Ok(())
        });
    }

    #[test]
    fn test_missing_or_unsupported_file() {
        Jail::expect_with(|jail| {
            let missing = ConfigLoader::new().file(jail.directory().join("absent.toml")).load();
            assert!(matches!(missing, Err(ConfigError::FileNotFound(_))));

            jail.create_file("cinder.ini", "")?;
            let unsupported = ConfigLoader::new().file(jail.directory().join("cinder.ini")).load();
            assert!(matches!(unsupported, Err(ConfigError::UnsupportedFormat(ext)) if ext == "ini"));
            Ok(())
        });
    }

    #[test]
    fn test_profile_parsing() {
        assert_eq!(Profile::parse("PROD"), Profile::Production);
        assert_eq!(Profile::parse("dev"), Profile::Development);
        assert_eq!(Profile::parse("staging"), Profile::Custom("staging".to_string()));
        assert_eq!(Profile::Production.to_string(), "production");
    }
}
