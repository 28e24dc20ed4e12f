//! # Cinder
//!
//! A pluggable-component runtime for message-driven applications.
//!
//! Behavior is split into small modules (commands, event listeners,
//! inhibitors, monitors, language packs) that are discovered from
//! directories, loaded, reloaded and removed at runtime by one handler per
//! module kind.
//!
//! ```text
//! ┌─────────────┐  events   ┌──────────────────┐
//! │ application │─────────▶│ ListenerHandler  │──▶ listeners (own task each)
//! │  (client)   │          └──────────────────┘
//! └──────┬──────┘
//!        │ message     ┌──────────────────┐   ┌────────────────┐
//!        ├────────────▶│ InhibitorHandler │──▶│ CommandHandler │──▶ cooldowns
//!        │             └──────────────────┘   └────────────────┘
//!        │             ┌──────────────────┐
//!        └────────────▶│ MonitorHandler   │
//!                      └──────────────────┘
//! ```
//!
//! - [`core`]: the `Handler`/`Module` lifecycle engine and event source
//! - [`framework`]: the module kinds, rate limiting and translations
//! - [`runtime`]: configuration, logging and the `CinderRuntime` orchestrator
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cinder::prelude::*;
//!
//! #[distributed_slice(MODULE_REGISTRY)]
//! #[linkme(crate = cinder::core::linkme)]
//! static PING: ModuleDescriptor = ModuleDescriptor::new("commands", "ping", |_ctx| {
//!     Box::pin(async {
//!         let ping = Command::new(CommandOptions::new("ping"))
//!             .with_run(|_, _| async { Ok::<_, BoxError>("pong".into()) });
//!         Ok(loaded(ping))
//!     })
//! });
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     CinderRuntime::new().run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: `cinder.toml` configuration files
//! - `yaml-config`: `cinder.yaml` configuration files
//! - `json-log`: JSON log output

pub use cinder_core as core;
pub use cinder_framework as framework;
pub use cinder_runtime as runtime;

/// Commonly used types.
///
/// ```rust,ignore
/// use cinder::prelude::*;
/// ```
pub mod prelude {
    // Runtime
    pub use cinder_runtime::{CinderConfig, CinderRuntime, ConfigLoader, LoggingBuilder, READY};

    // Lifecycle engine
    pub use cinder_core::linkme::distributed_slice;
    pub use cinder_core::prelude::*;
    pub use cinder_core::{MODULE_REGISTRY, Payload};

    // Module kinds
    pub use cinder_framework::{
        Command, CommandHandler, CommandOptions, Inhibitor, InhibitorHandler, InhibitorOptions, InhibitorType,
        Language, LanguageHandler, LanguageOptions, Listener, ListenerFn, ListenerHandler, ListenerOptions, Monitor,
        MonitorHandler, RateLimit, RateLimitManager, TranslationFn,
    };

    // Logging macros
    pub use cinder_runtime::prelude::*;
}
