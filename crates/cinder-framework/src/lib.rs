//! # Cinder Framework
//!
//! Module kinds built on the Cinder core, each with its own handler:
//!
//! - [`Listener`] / [`ListenerHandler`]: functions bound to named events on
//!   an [`EventSource`](cinder_core::EventSource), run in isolated tasks.
//! - [`Inhibitor`] / [`InhibitorHandler`]: the priority-ordered veto chain.
//! - [`Monitor`] / [`MonitorHandler`]: observers of every inbound message.
//! - [`Command`] / [`CommandHandler`]: named actions with aliases and
//!   per-key cooldowns.
//! - [`Language`] / [`LanguageHandler`]: namespaced translations with a
//!   path grammar and `#{…}` interpolation.
//!
//! Rate limiting ([`RateLimit`], [`RateLimitManager`]) is usable on its own.

use std::any::Any;

pub mod command;
pub mod error;
pub mod inhibitor;
pub mod language;
pub mod listener;
pub mod monitor;
pub mod ratelimit;

pub use command::{Command, CommandFn, CommandHandler, CommandOptions, Cooldown};
pub use error::{LanguageError, ListenerError, Ratelimited, TranslateError, TranslateResult};
pub use inhibitor::{InhibitFn, Inhibitor, InhibitorHandler, InhibitorOptions, InhibitorPolicy, InhibitorType};
pub use language::{
    DEFAULT_NAMESPACE, FunctionArgs, Language, LanguageBuilder, LanguageHandler, LanguageOptions,
    LanguageShared, Node, TranslationFn, TranslationPath, interpolate,
};
pub use listener::{
    DEFAULT_EMITTER, EmitterRef, Listener, ListenerEvent, ListenerFn, ListenerHandler, ListenerOptions,
    ListenerShared, ListenerSubscription, method_name,
};
pub use monitor::{Monitor, MonitorEvent, MonitorFilter, MonitorFn, MonitorHandler};
pub use ratelimit::{DEFAULT_SWEEP_INTERVAL, MIN_SWEEP_INTERVAL, RateLimit, RateLimitManager, SweepFilter};

/// Best-effort text of a caught panic.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked".to_string()
    }
}
