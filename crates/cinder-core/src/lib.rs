//! # Cinder Core
//!
//! The module lifecycle engine of the Cinder component runtime.
//!
//! An application is assembled from many small *modules* (commands, event
//! listeners, inhibitors, monitors, language packs). Each category of module
//! is owned by a [`Handler<T>`] that discovers, builds, type-checks, stores,
//! reloads, and removes them, while announcing every change on its own
//! [`EventSource`].
//!
//! ## Building blocks
//!
//! - **Modules**: [`Module`] plus the embedded [`ModuleCore`] carry identity
//!   (id, category, source location), the enabled flag, and the
//!   back-reference to the owning handler. [`ModuleLifecycle`] adds
//!   `enable`/`disable`/`reload`/`unload` on `Arc<T>`.
//! - **Descriptors**: [`ModuleDescriptor`]s map a file's relative path to a
//!   factory. They are registered at runtime or collected at link time in
//!   [`MODULE_REGISTRY`].
//! - **Events**: [`EventSource`] is a named-event emitter whose attachments
//!   return a [`SubscriptionHandle`] able to undo exactly that attachment.
//!
//! ```text
//! ┌───────────┐  walk   ┌─────────────┐  factory  ┌────────┐
//! │ directory │───────▶│ Handler<T>  │─────────▶│ Module │
//! └───────────┘        │ (store, ids)│◀─────────└────────┘
//!                      └─────┬───────┘  downcast
//!                            │ loadError / moduleLoaded / …
//!                            ▼
//!                      ┌─────────────┐
//!                      │ EventSource │
//!                      └─────────────┘
//! ```

pub mod descriptor;
pub mod emitter;
pub mod error;
pub mod events;
pub mod handler;
pub mod module;

pub use descriptor::{
    ClientRef, LoadContext, LoadedModule, MODULE_REGISTRY, ModuleDescriptor, ModuleFactory,
    loaded, registered,
};
pub use emitter::{Callback, EventSource, Payload, SubscriptionHandle};
pub use error::{BoxError, LoadError, LoadResult, SharedError};
pub use events::HandlerEvent;
pub use handler::{Handler, HandlerOptions, LoadFilter, Resolvable, default_filter};
pub use module::{
    DEFAULT_CATEGORY, Module, ModuleCore, ModuleLifecycle, ModuleOptions, SourceLocation,
};

// Re-exported so descriptor statics and module impls need no direct
// dependency on these crates.
pub use async_trait::async_trait;
pub use futures::future::BoxFuture;
pub use linkme;

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        BoxError, BoxFuture, EventSource, Handler, HandlerEvent, HandlerOptions, LoadContext,
        LoadError, LoadResult, Module, ModuleCore, ModuleDescriptor, ModuleLifecycle,
        ModuleOptions, async_trait, loaded,
    };
}
