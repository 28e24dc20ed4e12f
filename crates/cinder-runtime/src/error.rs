//! Runtime error types.

use cinder_core::LoadError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The configuration could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A handler directory could not be read.
    #[error("Failed to load {handler}: {source}")]
    Load {
        handler: &'static str,
        #[source]
        source: LoadError,
    },

    /// Installing a shutdown signal handler failed.
    #[error("Failed to listen for shutdown signals: {0}")]
    Signal(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
