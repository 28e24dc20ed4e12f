//! Configuration for the Cinder runtime.
//!
//! Settings are layered with figment (defaults, `cinder.toml`, `CINDER_*`
//! environment variables, programmatic overrides) and checked by
//! [`validate_config`] before a runtime is built from them.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    CinderConfig, HandlerConfig, HandlersConfig, InhibitorConfig, LanguageConfig, LogFormat, LogLevel,
    LogOutput, LogRotation, LoggingConfig, RateLimitConfig, SpanEventConfig,
};
pub use validation::validate_config;
