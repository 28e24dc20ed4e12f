//! Module descriptors: the registration table a [`Handler`] loads from.
//!
//! A handler never inspects a file to find what to construct. Instead each
//! loadable file has a [`ModuleDescriptor`] naming its category, its path
//! relative to the handler directory, and a factory. The handler walks its
//! directory and, for every qualifying file, calls the factory registered
//! under that file's relative path.
//!
//! Descriptors come from two places:
//!
//! - [`Handler::register`] at runtime (re-registering a path swaps the
//!   factory used by the next reload), and
//! - the [`MODULE_REGISTRY`] distributed slice, filled at link time:
//!
//! ```rust,ignore
//! use cinder_core::linkme::distributed_slice;
//! use cinder_core::{MODULE_REGISTRY, ModuleDescriptor, loaded};
//!
//! #[distributed_slice(MODULE_REGISTRY)]
//! #[linkme(crate = cinder_core::linkme)]
//! static PING: ModuleDescriptor = ModuleDescriptor::new("commands", "general/ping", |_ctx| {
//!     Box::pin(async { Ok(loaded(Command::new(PingCommand))) })
//! });
//! ```
//!
//! [`Handler`]: crate::Handler
//! [`Handler::register`]: crate::Handler::register

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use linkme::distributed_slice;
use serde_json::Value;

use crate::error::BoxError;
use crate::module::SourceLocation;

/// A constructed module whose concrete type has not been checked yet.
pub type LoadedModule = Box<dyn Any + Send + Sync>;

/// Reference to the application object modules are constructed with.
pub type ClientRef = Arc<dyn Any + Send + Sync>;

/// Factory producing a fresh module instance for one load.
pub type ModuleFactory = fn(LoadContext) -> BoxFuture<'static, Result<LoadedModule, BoxError>>;

/// Erases a module for return from a [`ModuleFactory`].
pub fn loaded<T: Any + Send + Sync>(module: T) -> LoadedModule {
    Box::new(module)
}

/// Static handle describing one loadable file.
#[derive(Clone, Copy)]
pub struct ModuleDescriptor {
    /// Name of the handler this descriptor belongs to.
    pub category: &'static str,
    /// Path relative to the handler directory, `/`-separated, no extension.
    pub path: &'static str,
    /// Factory invoked on every (re)load.
    pub create: ModuleFactory,
}

impl ModuleDescriptor {
    /// Creates a descriptor.
    pub const fn new(category: &'static str, path: &'static str, create: ModuleFactory) -> Self {
        Self {
            category,
            path,
            create,
        }
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("category", &self.category)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Link-time registry of descriptors. Every [`Handler`](crate::Handler)
/// picks up the entries whose `category` equals its name.
#[distributed_slice]
pub static MODULE_REGISTRY: [ModuleDescriptor];

/// Returns the link-time descriptors registered for `category`.
pub fn registered(category: &str) -> impl Iterator<Item = &'static ModuleDescriptor> + '_ {
    MODULE_REGISTRY.iter().filter(move |d| d.category == category)
}

/// What a factory gets to build a module with.
#[derive(Clone)]
pub struct LoadContext {
    client: Option<ClientRef>,
    location: SourceLocation,
    settings: Arc<Value>,
}

impl LoadContext {
    pub(crate) fn new(client: Option<ClientRef>, location: SourceLocation, settings: Arc<Value>) -> Self {
        Self {
            client,
            location,
            settings,
        }
    }

    /// Returns the owning client if it is a `C`.
    pub fn client<C: Any + Send + Sync>(&self) -> Option<Arc<C>> {
        self.client.clone()?.downcast::<C>().ok()
    }

    /// Location being loaded.
    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    /// Deserializes the settings section configured for this module (keyed
    /// by its relative path), or `null` when none is configured.
    ///
    /// Use `#[serde(default)]` on `T` to make every field optional.
    pub fn settings<T>(&self) -> serde_json::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let key = self.location.key();
        match self.settings.get(&key) {
            Some(section) => T::deserialize(section),
            None => T::deserialize(&Value::Null),
        }
    }
}

impl fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadContext")
            .field("location", &self.location)
            .field("has_client", &self.client.is_some())
            .finish()
    }
}
