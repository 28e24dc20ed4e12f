//! Error types for the Cinder framework components.

use std::time::Duration;

use cinder_core::SharedError;
use thiserror::Error;

/// Errors raised while binding a listener to its event source.
#[derive(Debug, Clone, Error)]
pub enum ListenerError {
    /// The listener names an emitter that the handler does not know.
    #[error("listener '{listener}' refers to unknown emitter '{emitter}'")]
    MissingEmitter {
        /// Listener id.
        listener: String,
        /// Requested emitter name.
        emitter: String,
    },

    /// A multi-event listener has no method for one of its events.
    #[error("listener '{listener}' has no method '{method}' for event '{event}'")]
    MissingMethod {
        /// Listener id.
        listener: String,
        /// Event being bound.
        event: String,
        /// Method name that was looked up.
        method: String,
    },
}

/// Returned by a rate limit that has no uses left in the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("ratelimited, retry in {}ms", .remaining_time.as_millis())]
pub struct Ratelimited {
    /// Time until the window resets.
    pub remaining_time: Duration,
}

/// Errors raised by translation lookups.
#[derive(Debug, Clone, Error)]
pub enum TranslateError {
    /// The path does not follow `[namespace:]dotted.path[[index]]`.
    #[error("invalid translation path '{path}'")]
    InvalidPath {
        /// Offending path.
        path: String,
    },

    /// The namespace is not declared by the language.
    #[error("missing or incorrect namespace '{namespace}' in language '{language}'")]
    MissingNamespace {
        /// Requested namespace.
        namespace: String,
        /// Language id.
        language: String,
    },

    /// Nothing is stored under the path.
    #[error("missing translation '{path}' in language '{language}'")]
    MissingTranslation {
        /// Requested path.
        path: String,
        /// Language id.
        language: String,
    },

    /// No language matches the id or alias.
    #[error("missing language '{language}'")]
    MissingLanguage {
        /// Requested id or alias.
        language: String,
    },

    /// A function entry failed.
    #[error("translation function '{path}' failed: {source}")]
    Function {
        /// Path of the function entry.
        path: String,
        /// Underlying error.
        #[source]
        source: SharedError,
    },

    /// Interpolation kept producing markers.
    #[error("interpolation of '{path}' did not settle after {passes} passes")]
    InterpolationLoop {
        /// Path being interpolated.
        path: String,
        /// Passes performed.
        passes: usize,
    },
}

impl TranslateError {
    /// Whether this is a [`TranslateError::MissingTranslation`].
    pub fn is_missing_translation(&self) -> bool {
        matches!(self, Self::MissingTranslation { .. })
    }
}

/// Result type for translation lookups.
pub type TranslateResult<T> = Result<T, TranslateError>;

/// Errors raised while constructing a language.
#[derive(Debug, Clone, Error)]
pub enum LanguageError {
    /// A translation tree was given for a namespace that is not declared.
    #[error("namespace '{namespace}' is not declared")]
    UndeclaredNamespace {
        /// Offending namespace.
        namespace: String,
    },

    /// A namespace tree is not a JSON object.
    #[error("namespace '{namespace}' must be an object")]
    NotAnObject {
        /// Offending namespace.
        namespace: String,
    },
}
