//! Cinder Runtime: configuration, logging and orchestration.
//!
//! - [`config`]: figment-layered [`CinderConfig`] with validation
//! - [`logging`]: [`LoggingBuilder`] over `tracing-subscriber`
//! - [`CinderRuntime`]: builds every handler from the configuration, loads
//!   their directories, initializes modules, and announces `ready`
//!
//! ```ignore
//! use cinder_runtime::CinderRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = CinderRuntime::new();
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{CinderConfig, ConfigError, ConfigLoader, ConfigResult, HandlerConfig, HandlersConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, init_from_config};
pub use runtime::{CinderRuntime, READY, RuntimeBuilder, RuntimeStats};

// Re-export tracing for use by module crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
