//! Listeners: modules bound to named events on an [`EventSource`].
//!
//! A listener either wraps one function for all of its events (single
//! mode) or picks a function per event by method name (multi mode). The
//! method name for `messageCreate` is `on_message_create` unless the
//! options map the event to another name.
//!
//! Binding happens when the listener is stored in its handler and is
//! undone through the recorded [`ListenerSubscription`] when it leaves,
//! whether by removal or by a reload replacing it.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use cinder_core::events::{LISTENER_ERROR, LISTENER_RAN};
use cinder_core::{
    BoxError, BoxFuture, EventSource, Handler, HandlerOptions, Module, ModuleCore, ModuleOptions,
    Payload, SharedError, SubscriptionHandle,
};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{Instrument, debug, trace, warn};

use crate::error::ListenerError;
use crate::panic_message;

/// Emitter name listeners bind to unless told otherwise.
pub const DEFAULT_EMITTER: &str = "client";

/// A listener function, synchronous or asynchronous.
#[derive(Clone)]
pub enum ListenerFn {
    /// Runs to completion inside the spawned task.
    Sync(Arc<dyn Fn(Arc<Listener>, Payload) -> Result<Value, BoxError> + Send + Sync>),
    /// Awaited inside the spawned task.
    Async(Arc<dyn Fn(Arc<Listener>, Payload) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>),
}

impl ListenerFn {
    /// Wraps a synchronous function.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Arc<Listener>, Payload) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wraps an asynchronous function.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<Listener>, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Self::Async(Arc::new(
            move |listener: Arc<Listener>, payload: Payload| -> BoxFuture<'static, Result<Value, BoxError>> {
                Box::pin(f(listener, payload))
            },
        ))
    }

    async fn call(&self, listener: Arc<Listener>, payload: Payload) -> Result<Value, BoxError> {
        match self {
            Self::Sync(f) => f(listener, payload),
            Self::Async(f) => f(listener, payload).await,
        }
    }
}

impl fmt::Debug for ListenerFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sync(_) => "ListenerFn::Sync",
            Self::Async(_) => "ListenerFn::Async",
        })
    }
}

/// Where a listener finds its event source.
#[derive(Debug, Clone)]
pub enum EmitterRef {
    /// A source given directly.
    Source(EventSource),
    /// A source registered in the owning handler under this name.
    Named(String),
}

impl Default for EmitterRef {
    fn default() -> Self {
        Self::Named(DEFAULT_EMITTER.to_string())
    }
}

/// Options for [`Listener`].
#[derive(Debug, Clone, Default)]
pub struct ListenerOptions {
    /// Identity options.
    pub module: ModuleOptions,
    /// Event source.
    pub emitter: EmitterRef,
    /// Event names to bind.
    pub events: Vec<String>,
    /// Bind with `once` instead of `on`.
    pub once: bool,
    /// Event name → method name, overriding the naming convention.
    pub method_map: HashMap<String, String>,
}

impl ListenerOptions {
    /// Options with an explicit id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            module: ModuleOptions::new(id),
            ..Self::default()
        }
    }

    /// Adds an event.
    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.events.push(event.into());
        self
    }

    /// Binds to the emitter registered under `name`.
    pub fn emitter(mut self, name: impl Into<String>) -> Self {
        self.emitter = EmitterRef::Named(name.into());
        self
    }

    /// Binds to `source` directly.
    pub fn source(mut self, source: EventSource) -> Self {
        self.emitter = EmitterRef::Source(source);
        self
    }

    /// Fires at most once per binding.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Maps `event` to the method `method`.
    pub fn method(mut self, event: impl Into<String>, method: impl Into<String>) -> Self {
        self.method_map.insert(event.into(), method.into());
        self
    }
}

/// Method name for `event` by convention: `messageCreate` becomes
/// `on_message_create`.
pub fn method_name(event: &str) -> String {
    let mut name = String::from("on_");
    let mut prev_lower = false;
    for c in event.chars() {
        if c.is_uppercase() {
            if prev_lower {
                name.push('_');
            }
            name.extend(c.to_lowercase());
            prev_lower = false;
        } else if matches!(c, '-' | '.' | ' ') {
            name.push('_');
            prev_lower = false;
        } else {
            name.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    name
}

/// Payload of `listenerRan` / `listenerError`.
#[derive(Clone)]
pub enum ListenerEvent {
    /// A listener function completed.
    Ran {
        /// The listener.
        listener: Arc<Listener>,
        /// Event that triggered it.
        event: String,
        /// What it returned.
        result: Value,
    },
    /// A listener function failed or panicked.
    Error {
        /// The listener.
        listener: Arc<Listener>,
        /// Event that triggered it.
        event: String,
        /// What went wrong.
        error: SharedError,
    },
}

/// What a listener bound, and the means to unbind it.
#[derive(Debug)]
pub struct ListenerSubscription {
    source: EventSource,
    handles: Vec<SubscriptionHandle>,
}

impl ListenerSubscription {
    /// Source the handles belong to.
    pub fn source(&self) -> &EventSource {
        &self.source
    }

    /// Bound event names.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.handles.iter().map(SubscriptionHandle::event)
    }

    /// Number of bound functions.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Detaches every recorded handle. Returns how many were still attached.
    pub fn detach(self) -> usize {
        self.handles
            .into_iter()
            .map(SubscriptionHandle::detach)
            .filter(|removed| *removed)
            .count()
    }
}

enum Binding {
    Single(ListenerFn),
    Multi(HashMap<String, ListenerFn>),
}

/// A module reacting to named events.
pub struct Listener {
    core: ModuleCore,
    emitter: EmitterRef,
    events: Vec<String>,
    once: bool,
    method_map: HashMap<String, String>,
    binding: Binding,
    subscription: Mutex<Option<ListenerSubscription>>,
}

impl Listener {
    /// Creates a single-mode listener running `run` for each of its events.
    pub fn new(options: ListenerOptions, run: ListenerFn) -> Self {
        Self::build(options, Binding::Single(run))
    }

    /// Creates a multi-mode listener from named methods.
    pub fn multi<I, S>(options: ListenerOptions, methods: I) -> Self
    where
        I: IntoIterator<Item = (S, ListenerFn)>,
        S: Into<String>,
    {
        let methods = methods.into_iter().map(|(k, f)| (k.into(), f)).collect();
        Self::build(options, Binding::Multi(methods))
    }

    fn build(options: ListenerOptions, binding: Binding) -> Self {
        Self {
            core: ModuleCore::new(options.module),
            emitter: options.emitter,
            events: options.events,
            once: options.once,
            method_map: options.method_map,
            binding,
            subscription: Mutex::new(None),
        }
    }

    /// Bound event names.
    pub fn events(&self) -> &[String] {
        &self.events
    }

    /// Whether the listener fires at most once per binding.
    pub fn is_once(&self) -> bool {
        self.once
    }

    /// Where the listener finds its source.
    pub fn emitter(&self) -> &EmitterRef {
        &self.emitter
    }

    /// Whether the listener is currently bound.
    pub fn is_listening(&self) -> bool {
        self.subscription.lock().is_some()
    }

    fn resolve(&self) -> Result<Vec<(String, ListenerFn)>, ListenerError> {
        self.events
            .iter()
            .map(|event| -> Result<(String, ListenerFn), ListenerError> {
                let func = match &self.binding {
                    Binding::Single(run) => run.clone(),
                    Binding::Multi(methods) => {
                        let method = self
                            .method_map
                            .get(event)
                            .cloned()
                            .unwrap_or_else(|| method_name(event));
                        methods
                            .get(&method)
                            .cloned()
                            .ok_or_else(|| ListenerError::MissingMethod {
                                listener: self.core.id(),
                                event: event.clone(),
                                method,
                            })?
                    }
                };
                Ok((event.clone(), func))
            })
            .collect()
    }

    /// Binds every event on `source`, replacing any previous binding.
    /// Returns the number of bound functions.
    pub fn listen(self: &Arc<Self>, source: EventSource) -> Result<usize, ListenerError> {
        let functions = self.resolve()?;
        self.stop_listening();

        let handles: Vec<SubscriptionHandle> = functions
            .into_iter()
            .map(|(event, func)| {
                let weak = Arc::downgrade(self);
                let name = event.clone();
                let callback = move |payload: &Payload| {
                    if let Some(listener) = weak.upgrade() {
                        listener.dispatch(&name, &func, Arc::clone(payload));
                    }
                };
                if self.once {
                    source.once(&event, callback)
                } else {
                    source.on(&event, callback)
                }
            })
            .collect();

        let count = handles.len();
        debug!(
            listener = %self.core.qualified_name(),
            source = source.name(),
            count,
            once = self.once,
            "Listening"
        );
        *self.subscription.lock() = Some(ListenerSubscription { source, handles });
        Ok(count)
    }

    /// Detaches what the last [`listen`](Self::listen) attached. Returns the
    /// number of detached functions; 0 when not listening.
    pub fn stop_listening(&self) -> usize {
        let Some(subscription) = self.subscription.lock().take() else {
            return 0;
        };
        let detached = subscription.detach();
        debug!(listener = %self.core.qualified_name(), detached, "Stopped listening");
        detached
    }

    fn dispatch(self: &Arc<Self>, event: &str, func: &ListenerFn, payload: Payload) {
        if !self.core.is_enabled() {
            trace!(listener = %self.core.qualified_name(), event, "Listener disabled, skipping");
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(listener = %self.core.qualified_name(), event, "No tokio runtime, listener skipped");
            return;
        };

        let listener = Arc::clone(self);
        let event = event.to_string();
        let func = func.clone();
        let span = self.core.span();
        runtime.spawn(
            async move {
                let outcome = AssertUnwindSafe(func.call(Arc::clone(&listener), payload))
                    .catch_unwind()
                    .await;
                let error: SharedError = match outcome {
                    Ok(Ok(result)) => {
                        listener.report(LISTENER_RAN, ListenerEvent::Ran {
                            listener: Arc::clone(&listener),
                            event,
                            result,
                        });
                        return;
                    }
                    Ok(Err(e)) => Arc::from(e),
                    Err(panic) => Arc::from(BoxError::from(panic_message(panic.as_ref()))),
                };
                warn!(event = %event, error = %error, "Listener failed");
                listener.report(LISTENER_ERROR, ListenerEvent::Error {
                    listener: Arc::clone(&listener),
                    event,
                    error,
                });
            }
            .instrument(span),
        );
    }

    fn report(&self, name: &str, event: ListenerEvent) {
        if let Some(handler) = self.core.handler::<Listener>() {
            handler.emit_event(name, event);
        }
    }
}

impl Module for Listener {
    type Shared = ListenerShared;

    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn attach(module: &Arc<Self>, handler: &Handler<Self>) -> Result<(), BoxError> {
        let source = match &module.emitter {
            EmitterRef::Source(source) => source.clone(),
            EmitterRef::Named(name) => {
                handler
                    .shared()
                    .emitter(name)
                    .ok_or_else(|| ListenerError::MissingEmitter {
                        listener: module.core.id(),
                        emitter: name.clone(),
                    })?
            }
        };
        module.listen(source)?;
        Ok(())
    }

    fn detach(module: &Arc<Self>) {
        module.stop_listening();
    }
}

/// Emitter table shared by every listener of one handler.
#[derive(Debug, Default)]
pub struct ListenerShared {
    emitters: RwLock<HashMap<String, EventSource>>,
}

impl ListenerShared {
    /// Registers `source` under `name`, returning the previous one.
    pub fn set_emitter(&self, name: impl Into<String>, source: EventSource) -> Option<EventSource> {
        self.emitters.write().insert(name.into(), source)
    }

    /// Looks an emitter up.
    pub fn emitter(&self, name: &str) -> Option<EventSource> {
        self.emitters.read().get(name).cloned()
    }

    /// Registered emitter names.
    pub fn emitter_names(&self) -> Vec<String> {
        self.emitters.read().keys().cloned().collect()
    }
}

/// Handler of [`Listener`]s.
#[derive(Debug, Clone)]
pub struct ListenerHandler {
    inner: Arc<Handler<Listener>>,
}

impl ListenerHandler {
    /// Creates the handler.
    pub fn new(options: HandlerOptions) -> Self {
        Self {
            inner: Handler::new(options),
        }
    }

    /// Registers an emitter listeners can name. Register emitters before
    /// loading the listeners that use them.
    pub fn set_emitter(&self, name: impl Into<String>, source: EventSource) -> Option<EventSource> {
        self.inner.shared().set_emitter(name, source)
    }

    /// Looks an emitter up.
    pub fn emitter(&self, name: &str) -> Option<EventSource> {
        self.inner.shared().emitter(name)
    }

    /// The underlying handler.
    pub fn handler(&self) -> &Arc<Handler<Listener>> {
        &self.inner
    }
}

impl Deref for ListenerHandler {
    type Target = Handler<Listener>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
