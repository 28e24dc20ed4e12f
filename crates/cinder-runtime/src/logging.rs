//! Subscriber setup driven by [`LoggingConfig`].
//!
//! Every module runs inside a span named after the module
//! (`module = "category.id"`), so per-module filtering and span events
//! come for free once a subscriber is installed.
//!
//! ```rust,ignore
//! use cinder_runtime::config::SpanEventConfig;
//! use cinder_runtime::logging::LoggingBuilder;
//!
//! LoggingBuilder::from_config(&config.logging)
//!     .directive("cinder_core=debug")
//!     .span_events(SpanEventConfig::LIFECYCLE)
//!     .init();
//! ```

use std::ffi::OsStr;
use std::path::Path;

use tracing::warn;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LogOutput, LogRotation, LoggingConfig, SpanEventConfig};

/// Installs the subscriber described by `config`. Does nothing if a global
/// subscriber is already installed.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = LoggingBuilder::from_config(config).try_init();
}

/// A [`LoggingConfig`] plus filter directives, ready to install.
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    config: LoggingConfig,
    directives: Vec<String>,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::from_config(&LoggingConfig::default())
    }
}

impl LoggingBuilder {
    /// Per-target filters become directives, sorted by target.
    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut filters: Vec<_> = config.filters.iter().collect();
        filters.sort_by(|a, b| a.0.cmp(b.0));

        Self {
            config: config.clone(),
            directives: filters
                .into_iter()
                .map(|(target, level)| format!("{target}={level}"))
                .collect(),
        }
    }

    /// Adds a filter directive such as `cinder_framework=trace`.
    pub fn directive(mut self, directive: &str) -> Self {
        self.directives.push(directive.to_string());
        self
    }

    /// Overrides the configured span events.
    pub fn span_events(mut self, events: SpanEventConfig) -> Self {
        self.config.span_events = events;
        self
    }

    /// `RUST_LOG` if set, else the configured level; then the directives.
    fn build_filter(&self) -> EnvFilter {
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.config.level.as_str()));

        for directive in &self.directives {
            match directive.parse::<Directive>() {
                Ok(d) => filter = filter.add_directive(d),
                Err(e) => warn!(directive = %directive, error = %e, "Ignoring invalid log directive"),
            }
        }

        filter
    }

    fn fmt_span(events: SpanEventConfig) -> FmtSpan {
        [
            (events.new, FmtSpan::NEW),
            (events.enter, FmtSpan::ENTER),
            (events.exit, FmtSpan::EXIT),
            (events.close, FmtSpan::CLOSE),
        ]
        .into_iter()
        .filter(|(on, _)| *on)
        .fold(FmtSpan::NONE, |acc, (_, span)| acc | span)
    }

    fn file_appender(path: &Path, rotation: LogRotation) -> RollingFileAppender {
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path.file_name().unwrap_or_else(|| OsStr::new("cinder.log"));
        match rotation {
            LogRotation::Never => rolling::never(directory, file_name),
            LogRotation::Hourly => rolling::hourly(directory, file_name),
            LogRotation::Daily => rolling::daily(directory, file_name),
        }
    }

    /// Installs the subscriber, ignoring the error if one is already set.
    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Installs the subscriber.
    pub fn try_init(self) -> Result<(), TryInitError> {
        let filter = self.build_filter();
        let span_events = Self::fmt_span(self.config.span_events);
        let location = self.config.file_location;

        macro_rules! configure_layer {
            ($layer:expr) => {
                $layer
                    .with_span_events(span_events.clone())
                    .with_thread_ids(self.config.thread_ids)
                    .with_file(location)
                    .with_line_number(location)
            };
        }

        macro_rules! init_with_writer {
            ($writer:expr) => {
                match self.config.format {
                    #[cfg(feature = "json-log")]
                    LogFormat::Json => {
                        let layer = fmt::layer()
                            .json()
                            .with_span_events(span_events.clone())
                            .with_writer($writer);
                        tracing_subscriber::registry().with(layer).with(filter).try_init()
                    }
                    LogFormat::Compact => {
                        let layer = configure_layer!(fmt::layer().compact().with_writer($writer));
                        tracing_subscriber::registry().with(layer).with(filter).try_init()
                    }
                    LogFormat::Full => {
                        let layer = configure_layer!(fmt::layer().with_writer($writer));
                        tracing_subscriber::registry().with(layer).with(filter).try_init()
                    }
                    LogFormat::Pretty => {
                        let layer = configure_layer!(fmt::layer().pretty().with_writer($writer));
                        tracing_subscriber::registry().with(layer).with(filter).try_init()
                    }
                }
            };
        }

        match (self.config.output, &self.config.file_path) {
            (LogOutput::Stdout, _) => init_with_writer!(std::io::stdout),
            (LogOutput::Stderr, _) => init_with_writer!(std::io::stderr),
            (LogOutput::File, Some(path)) => init_with_writer!(Self::file_appender(path, self.config.rotation)),
            (LogOutput::File, None) => {
                warn!("File output requested but no file path configured, falling back to stdout");
                init_with_writer!(std::io::stdout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use std::collections::HashMap;

    #[test]
    fn test_filters_become_sorted_directives() {
        let config = LoggingConfig {
            level: LogLevel::Warn,
            filters: HashMap::from([
                ("cinder_framework".to_string(), LogLevel::Trace),
                ("cinder_core".to_string(), LogLevel::Debug),
            ]),
            ..Default::default()
        };

        let builder = LoggingBuilder::from_config(&config).directive("cinder_runtime=info");

        assert_eq!(
            builder.directives,
            ["cinder_core=debug", "cinder_framework=trace", "cinder_runtime=info"]
        );
    }

    #[test]
    fn test_span_events_map_to_fmt_span() {
        assert_eq!(LoggingBuilder::fmt_span(SpanEventConfig::default()), FmtSpan::NONE);
        assert_eq!(
            LoggingBuilder::fmt_span(SpanEventConfig::LIFECYCLE),
            FmtSpan::NEW | FmtSpan::CLOSE
        );

        let builder = LoggingBuilder::default().span_events(SpanEventConfig::LIFECYCLE);
        assert_eq!(builder.config.span_events, SpanEventConfig::LIFECYCLE);
    }

    #[test]
    fn test_second_init_is_rejected() {
        let config = LoggingConfig {
            output: LogOutput::Stderr,
            ..Default::default()
        };
        let _ = LoggingBuilder::from_config(&config).try_init();
        assert!(LoggingBuilder::default().try_init().is_err());
    }
}
