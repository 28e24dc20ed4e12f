//! Error types for the Cinder core.
//!
//! Load failures never abort a batch: the [`Handler`](crate::Handler) reports
//! each one through its `loadError` event and keeps going.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error returned by user-supplied callbacks (factories, init hooks,
/// listener functions, predicates).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared form of [`BoxError`], so a [`LoadError`] can be both emitted and
/// returned.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while loading or registering a module.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// No descriptor is registered for the file.
    #[error("no module registered for '{path}'")]
    NotFound {
        /// Relative path of the file that was looked up.
        path: String,
    },

    /// The factory (or the directory walk) failed.
    #[error("failed to load '{path}': {source}")]
    Failed {
        /// Path of the file being loaded.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: SharedError,
    },

    /// The produced value is not of the handler's accepted type.
    #[error("module '{path}' is not a {expected}")]
    TypeMismatch {
        /// Path (or id) of the rejected module.
        path: String,
        /// Type name the handler accepts.
        expected: &'static str,
    },

    /// The module's attach hook rejected it (e.g. a listener whose event
    /// source does not exist).
    #[error("module '{id}' could not be attached: {source}")]
    Attach {
        /// Module id.
        id: String,
        /// Underlying error.
        #[source]
        source: SharedError,
    },

    /// The module was added without an id and has no file to derive one from.
    #[error("module of type {kind} has no id")]
    MissingId {
        /// Type name of the module.
        kind: &'static str,
    },

    /// The module has no recorded source location and cannot be reloaded.
    #[error("module '{id}' was not loaded from a file")]
    NoLocation {
        /// Module id.
        id: String,
    },

    /// The owning handler has been dropped.
    #[error("module '{id}' is detached from its handler")]
    Detached {
        /// Module id.
        id: String,
    },
}

impl LoadError {
    /// Creates a [`LoadError::Attach`] from any error.
    pub fn attach(id: impl Into<String>, source: impl Into<BoxError>) -> Self {
        let source: BoxError = source.into();
        Self::Attach {
            id: id.into(),
            source: Arc::from(source),
        }
    }

    /// Creates a [`LoadError::Failed`] from any error.
    pub fn failed(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        let source: BoxError = source.into();
        Self::Failed {
            path: path.into(),
            source: Arc::from(source),
        }
    }
}

/// Result type for load operations.
pub type LoadResult<T> = Result<T, LoadError>;
