//! Monitors: modules that observe every inbound message.

use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use cinder_core::events::{MONITOR_ERROR, MONITOR_RAN, MONITORS_RAN};
use cinder_core::{BoxError, BoxFuture, Handler, HandlerOptions, Module, ModuleCore, ModuleOptions, Payload, SharedError};
use futures::FutureExt;
use futures::future;
use serde_json::Value;
use tracing::{Instrument, debug, warn};

use crate::panic_message;

/// Body of a monitor.
pub type MonitorFn =
    Arc<dyn Fn(Arc<Monitor>, Payload) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

/// Decides whether a monitor runs for a message.
pub type MonitorFilter = Arc<dyn Fn(&Payload) -> bool + Send + Sync>;

/// Payload of the monitor events.
#[derive(Clone)]
pub enum MonitorEvent {
    /// A monitor completed.
    Ran {
        /// The monitor.
        monitor: Arc<Monitor>,
        /// Message it ran against.
        message: Payload,
        /// What it returned.
        result: Value,
    },
    /// A monitor failed or panicked.
    Error {
        /// The monitor.
        monitor: Arc<Monitor>,
        /// What went wrong.
        error: SharedError,
    },
    /// Every monitor for one message has settled.
    Settled {
        /// Number of monitors that ran.
        count: usize,
    },
}

/// A module run against every inbound message its filter accepts.
pub struct Monitor {
    core: ModuleCore,
    filter: Option<MonitorFilter>,
    run: MonitorFn,
}

impl Monitor {
    /// Creates a monitor that accepts every message.
    pub fn new<F, Fut>(options: ModuleOptions, run: F) -> Self
    where
        F: Fn(Arc<Monitor>, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Self {
            core: ModuleCore::new(options),
            filter: None,
            run: Arc::new(
                move |monitor: Arc<Monitor>, message: Payload| -> BoxFuture<'static, Result<Value, BoxError>> {
                    Box::pin(run(monitor, message))
                },
            ),
        }
    }

    /// Restricts the monitor to messages accepted by `filter`.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Payload) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Whether the monitor runs for `message`.
    pub fn accepts(&self, message: &Payload) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter(message))
    }
}

impl Module for Monitor {
    type Shared = ();

    fn core(&self) -> &ModuleCore {
        &self.core
    }
}

/// Handler of [`Monitor`]s.
#[derive(Debug, Clone)]
pub struct MonitorHandler {
    inner: Arc<Handler<Monitor>>,
}

impl MonitorHandler {
    /// Creates the handler.
    pub fn new(options: HandlerOptions) -> Self {
        Self {
            inner: Handler::new(options),
        }
    }

    /// The underlying handler.
    pub fn handler(&self) -> &Arc<Handler<Monitor>> {
        &self.inner
    }

    /// Runs every enabled monitor that accepts `message`, concurrently.
    ///
    /// Emits `monitorRan` or `monitorError` per monitor, then
    /// `monitorsRan`. Returns how many monitors ran.
    pub async fn run(&self, message: Payload) -> usize {
        let monitors: Vec<Arc<Monitor>> = self
            .inner
            .values()
            .into_iter()
            .filter(|m| m.core().is_enabled() && m.accepts(&message))
            .collect();

        future::join_all(monitors.iter().map(|m| self.run_one(m, Arc::clone(&message)))).await;

        let count = monitors.len();
        debug!(handler = %self.inner.name(), count, "Monitors ran");
        self.inner
            .emit_event(MONITORS_RAN, MonitorEvent::Settled { count });
        count
    }

    async fn run_one(&self, monitor: &Arc<Monitor>, message: Payload) {
        let span = monitor.core().span();
        let outcome = AssertUnwindSafe((monitor.run)(Arc::clone(monitor), Arc::clone(&message)))
            .catch_unwind()
            .instrument(span)
            .await;

        let event = match outcome {
            Ok(Ok(result)) => MonitorEvent::Ran {
                monitor: Arc::clone(monitor),
                message,
                result,
            },
            Ok(Err(e)) => MonitorEvent::Error {
                monitor: Arc::clone(monitor),
                error: Arc::from(e),
            },
            Err(panic) => MonitorEvent::Error {
                monitor: Arc::clone(monitor),
                error: Arc::from(BoxError::from(panic_message(panic.as_ref()))),
            },
        };

        let name = match &event {
            MonitorEvent::Error { error, .. } => {
                warn!(monitor = %monitor.core().qualified_name(), error = %error, "Monitor failed");
                MONITOR_ERROR
            }
            _ => MONITOR_RAN,
        };
        self.inner.emit_event(name, event);
    }
}

impl Deref for MonitorHandler {
    type Target = Handler<Monitor>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_core::ModuleLifecycle;
    use parking_lot::Mutex;
    use serde_json::json;

    fn handler() -> MonitorHandler {
        MonitorHandler::new(HandlerOptions::new("monitors").without_registry())
    }

    fn record(handler: &MonitorHandler, event: &str) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _ = handler.events().on_typed::<MonitorEvent, _>(event, move |event| {
            let entry = match event {
                MonitorEvent::Ran { monitor, result, .. } => format!("{}={}", monitor.core().id(), result),
                MonitorEvent::Error { monitor, error } => format!("{}!{}", monitor.core().id(), error),
                MonitorEvent::Settled { count } => count.to_string(),
            };
            s.lock().push(entry);
        });
        seen
    }

    async fn explode() -> Result<Value, BoxError> {
        panic!("kaboom")
    }

    #[tokio::test]
    async fn test_run_emits_per_monitor_and_settled() {
        let monitors = handler();
        monitors
            .insert(Monitor::new(ModuleOptions::new("count"), |_, _| async {
                Ok::<_, BoxError>(json!(1))
            }))
            .unwrap();
        monitors
            .insert(Monitor::new(ModuleOptions::new("broken"), |_, _| async {
                Err::<Value, BoxError>("nope".into())
            }))
            .unwrap();
        monitors
            .insert(Monitor::new(ModuleOptions::new("panics"), |_, _| explode()))
            .unwrap();

        let ran = record(&monitors, MONITOR_RAN);
        let errors = record(&monitors, MONITOR_ERROR);
        let settled = record(&monitors, MONITORS_RAN);

        let count = monitors.run(Arc::new("hello")).await;

        assert_eq!(count, 3);
        assert_eq!(*ran.lock(), vec!["count=1".to_string()]);
        let mut errors = errors.lock().clone();
        errors.sort();
        assert_eq!(errors, vec!["broken!nope".to_string(), "panics!kaboom".to_string()]);
        assert_eq!(*settled.lock(), vec!["3".to_string()]);
    }

    #[tokio::test]
    async fn test_filter_and_disabled_skip() {
        let monitors = handler();
        monitors
            .insert(
                Monitor::new(ModuleOptions::new("only-text"), |_, _| async {
                    Ok::<_, BoxError>(Value::Null)
                })
                .with_filter(|message| message.is::<String>()),
            )
            .unwrap();
        let idle = monitors
            .insert(Monitor::new(ModuleOptions::new("idle"), |_, _| async {
                Ok::<_, BoxError>(Value::Null)
            }))
            .unwrap();
        idle.disable();

        assert_eq!(monitors.run(Arc::new(42_u32)).await, 0);
        assert_eq!(monitors.run(Arc::new(String::from("hi"))).await, 1);
    }
}
