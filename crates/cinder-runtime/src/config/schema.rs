//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use cinder_framework::{DEFAULT_NAMESPACE, DEFAULT_SWEEP_INTERVAL, InhibitorPolicy};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CinderConfig {
    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Where each handler loads its modules from.
    #[serde(default)]
    pub handlers: HandlersConfig,

    /// Rate limiter defaults.
    #[serde(default)]
    pub ratelimit: RateLimitConfig,

    /// Translation settings.
    #[serde(default)]
    pub language: LanguageConfig,

    /// Inhibition chain settings.
    #[serde(default)]
    pub inhibitor: InhibitorConfig,

    /// Per-module settings, first by handler name, then by the module's
    /// path relative to the handler directory.
    ///
    /// ```toml
    /// [modules.commands."admin/ban"]
    /// reason = "spam"
    /// ```
    #[serde(default)]
    pub modules: HashMap<String, Value>,
}

impl CinderConfig {
    /// Settings object handed to the handler called `handler`.
    pub fn module_settings(&self, handler: &str) -> Value {
        self.modules.get(handler).cloned().unwrap_or(Value::Null)
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Lowercase name, as accepted by filter directives.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line format of the log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Newline-delimited JSON. Requires the `json-log` feature.
    #[cfg(feature = "json-log")]
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// The file at [`LoggingConfig::file_path`].
    File,
}

/// How often the log file is rolled over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
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

impl SpanEventConfig {
    /// Creation and close, one pair per module invocation.
    pub const LIFECYCLE: Self = Self {
        new: true,
        enter: false,
        exit: false,
        close: true,
    };
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level; `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, required when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Include thread ids.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Per-target levels, e.g. `cinder_core = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            rotation: LogRotation::Never,
            thread_ids: false,
            file_location: false,
            span_events: SpanEventConfig::default(),
            filters: HashMap::new(),
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// One handler's loading settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Whether the runtime loads this handler's directory at startup.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Module directory. Relative paths resolve against
    /// [`HandlersConfig::root`].
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Whether link-time descriptors are picked up.
    #[serde(default = "default_enabled")]
    pub use_registry: bool,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            use_registry: true,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Loading settings of the five built-in handlers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlersConfig {
    /// Base for relative handler directories. Defaults to the working
    /// directory.
    #[serde(default)]
    pub root: Option<PathBuf>,

    #[serde(default)]
    pub commands: HandlerConfig,

    #[serde(default)]
    pub listeners: HandlerConfig,

    #[serde(default)]
    pub inhibitors: HandlerConfig,

    #[serde(default)]
    pub monitors: HandlerConfig,

    #[serde(default)]
    pub languages: HandlerConfig,
}

impl HandlersConfig {
    /// Every handler section with its name.
    pub fn sections(&self) -> [(&'static str, &HandlerConfig); 5] {
        [
            ("commands", &self.commands),
            ("listeners", &self.listeners),
            ("inhibitors", &self.inhibitors),
            ("monitors", &self.monitors),
            ("languages", &self.languages),
        ]
    }

    /// Effective directory of `section`, or `None` if it has none.
    pub fn resolve(&self, section: &HandlerConfig) -> Option<PathBuf> {
        let directory = section.directory.as_deref()?;
        match &self.root {
            Some(root) if directory.is_relative() => Some(root.join(directory)),
            _ => Some(directory.to_path_buf()),
        }
    }
}

// =============================================================================
// Rate limits, languages, inhibitors
// =============================================================================

/// Rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Period of the idle-bucket sweep, in milliseconds.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl RateLimitConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

fn default_sweep_interval_ms() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_millis() as u64
}

/// Translation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Namespace used by paths without a `ns:` prefix.
    #[serde(default = "default_namespace")]
    pub default_namespace: String,

    /// Language consulted when a translation is missing.
    #[serde(default)]
    pub fallback: Option<String>,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            default_namespace: default_namespace(),
            fallback: None,
        }
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Inhibition chain settings.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct InhibitorConfig {
    /// What a failing inhibitor counts as.
    #[serde(default)]
    pub policy: InhibitorPolicy,
}

