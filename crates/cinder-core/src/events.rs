//! Lifecycle events emitted by a [`Handler`](crate::Handler).
//!
//! Event names are part of the public surface: collaborators subscribe to
//! them by string on [`Handler::events`](crate::Handler::events) and downcast
//! the payload to [`HandlerEvent<T>`].

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::LoadError;

/// A file failed to load or a module was rejected.
pub const LOAD_ERROR: &str = "loadError";
/// A module was stored (not emitted for reloads).
pub const MODULE_LOADED: &str = "moduleLoaded";
/// A module was removed from its handler.
pub const MODULE_REMOVED: &str = "moduleRemoved";
/// A module was enabled.
pub const MODULE_ENABLED: &str = "moduleEnabled";
/// A module was disabled.
pub const MODULE_DISABLED: &str = "moduleDisabled";
/// A module unloaded itself.
pub const MODULE_UNLOADED: &str = "moduleUnloaded";

/// A listener callback completed.
pub const LISTENER_RAN: &str = "listenerRan";
/// A listener callback failed or panicked.
pub const LISTENER_ERROR: &str = "listenerError";
/// A monitor completed for one message.
pub const MONITOR_RAN: &str = "monitorRan";
/// A monitor failed for one message.
pub const MONITOR_ERROR: &str = "monitorError";
/// All monitors for one message have settled.
pub const MONITORS_RAN: &str = "monitorsRan";

/// Payload of the handler lifecycle events.
#[derive(Debug)]
pub enum HandlerEvent<T> {
    /// See [`LOAD_ERROR`].
    LoadError {
        /// What went wrong.
        error: LoadError,
        /// File (or module id) concerned.
        path: PathBuf,
    },
    /// See [`MODULE_LOADED`].
    ModuleLoaded(Arc<T>),
    /// See [`MODULE_REMOVED`].
    ModuleRemoved(Arc<T>),
    /// See [`MODULE_ENABLED`].
    ModuleEnabled(Arc<T>),
    /// See [`MODULE_DISABLED`].
    ModuleDisabled(Arc<T>),
    /// See [`MODULE_UNLOADED`].
    ModuleUnloaded(Arc<T>),
}

impl<T> HandlerEvent<T> {
    /// Returns the event name this payload is emitted under.
    pub fn name(&self) -> &'static str {
        match self {
            Self::LoadError { .. } => LOAD_ERROR,
            Self::ModuleLoaded(_) => MODULE_LOADED,
            Self::ModuleRemoved(_) => MODULE_REMOVED,
            Self::ModuleEnabled(_) => MODULE_ENABLED,
            Self::ModuleDisabled(_) => MODULE_DISABLED,
            Self::ModuleUnloaded(_) => MODULE_UNLOADED,
        }
    }

    /// Returns the module carried by the event, if any.
    pub fn module(&self) -> Option<&Arc<T>> {
        match self {
            Self::LoadError { .. } => None,
            Self::ModuleLoaded(m)
            | Self::ModuleRemoved(m)
            | Self::ModuleEnabled(m)
            | Self::ModuleDisabled(m)
            | Self::ModuleUnloaded(m) => Some(m),
        }
    }
}
