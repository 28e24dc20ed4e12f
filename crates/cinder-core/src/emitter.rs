//! Named-event emitter.
//!
//! [`EventSource`] is the seam between the platform (or any other producer)
//! and the modules that react to it. Callbacks are attached per event name
//! and every attachment returns a [`SubscriptionHandle`] that knows exactly
//! how to undo itself.
//!
//! ```rust,ignore
//! let source = EventSource::new("client");
//! let handle = source.on("messageCreate", |payload| {
//!     if let Some(text) = payload.downcast_ref::<String>() {
//!         println!("{text}");
//!     }
//! });
//! source.emit("messageCreate", String::from("hi"));
//! handle.detach();
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::trace;

/// Type-erased event payload shared by every callback of one emission.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Callback stored in an [`EventSource`].
pub type Callback = Arc<dyn Fn(&Payload) + Send + Sync>;

struct Slot {
    id: u64,
    once: bool,
    callback: Callback,
}

struct Inner {
    name: String,
    next_id: AtomicU64,
    slots: RwLock<HashMap<String, Vec<Slot>>>,
}

/// A clonable handle to a named-event emitter.
///
/// Clones share the same subscriber table.
#[derive(Clone)]
pub struct EventSource {
    inner: Arc<Inner>,
}

impl EventSource {
    /// Creates an emitter. `name` only shows up in logs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                next_id: AtomicU64::new(1),
                slots: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Returns the emitter name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Attaches a persistent callback.
    pub fn on<F>(&self, event: &str, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.attach(event, Arc::new(callback), false)
    }

    /// Attaches a callback that is removed right before its first invocation.
    pub fn once<F>(&self, event: &str, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.attach(event, Arc::new(callback), true)
    }

    /// Attaches a callback that only fires for payloads of type `E`.
    pub fn on_typed<E, F>(&self, event: &str, callback: F) -> SubscriptionHandle
    where
        E: Any + Send + Sync,
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.on(event, move |payload| {
            if let Some(typed) = payload.downcast_ref::<E>() {
                callback(typed);
            }
        })
    }

    /// Attaches an already-boxed callback.
    pub fn attach(&self, event: &str, callback: Callback, once: bool) -> SubscriptionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .slots
            .write()
            .entry(event.to_string())
            .or_default()
            .push(Slot { id, once, callback });
        trace!(source = %self.inner.name, event, id, once, "Callback attached");
        SubscriptionHandle {
            source: Arc::downgrade(&self.inner),
            event: event.to_string(),
            id,
        }
    }

    /// Emits `payload` to every callback attached to `event`.
    ///
    /// Returns `false` (and does nothing) when nobody is subscribed.
    pub fn emit<E>(&self, event: &str, payload: E) -> bool
    where
        E: Any + Send + Sync,
    {
        if self.listener_count(event) == 0 {
            return false;
        }
        self.emit_payload(event, Arc::new(payload))
    }

    /// Emits an already-erased payload.
    pub fn emit_payload(&self, event: &str, payload: Payload) -> bool {
        let callbacks: Vec<Callback> = {
            let mut slots = self.inner.slots.write();
            let Some(list) = slots.get_mut(event) else {
                return false;
            };
            let callbacks = list.iter().map(|s| Arc::clone(&s.callback)).collect();
            list.retain(|s| !s.once);
            if list.is_empty() {
                slots.remove(event);
            }
            callbacks
        };

        if callbacks.is_empty() {
            return false;
        }
        for callback in &callbacks {
            callback(&payload);
        }
        true
    }

    /// Returns the number of callbacks attached to `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.slots.read().get(event).map_or(0, Vec::len)
    }

    /// Returns the names of all events with at least one callback.
    pub fn event_names(&self) -> Vec<String> {
        self.inner.slots.read().keys().cloned().collect()
    }

    /// Detaches every callback of every event.
    pub fn clear(&self) {
        self.inner.slots.write().clear();
    }
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("name", &self.inner.name)
            .field("events", &self.inner.slots.read().len())
            .finish()
    }
}

/// The exact means to detach one callback from one [`EventSource`].
///
/// Detaching consumes the handle, so a given attachment is undone at most
/// once. Dropping the handle leaves the callback attached.
#[derive(Debug)]
#[must_use = "dropping the handle leaves the callback attached with no way to detach it"]
pub struct SubscriptionHandle {
    source: Weak<Inner>,
    event: String,
    id: u64,
}

impl SubscriptionHandle {
    /// Name of the event this handle is attached to.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Removes the callback.
    ///
    /// Returns `false` when it was already gone (a fired `once` callback, a
    /// cleared or dropped source).
    pub fn detach(self) -> bool {
        let Some(inner) = self.source.upgrade() else {
            return false;
        };
        let mut slots = inner.slots.write();
        let Some(list) = slots.get_mut(&self.event) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != self.id);
        let removed = list.len() != before;
        if list.is_empty() {
            slots.remove(&self.event);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter(source: &EventSource, event: &str, once: bool) -> (Arc<AtomicUsize>, SubscriptionHandle) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let callback = move |_: &Payload| {
            c.fetch_add(1, Ordering::SeqCst);
        };
        let handle = if once {
            source.once(event, callback)
        } else {
            source.on(event, callback)
        };
        (count, handle)
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let source = EventSource::new("test");
        assert!(!source.emit("nothing", 1_u32));
    }

    #[test]
    fn test_persistent_and_once() {
        let source = EventSource::new("test");
        let (persistent, _h1) = counter(&source, "tick", false);
        let (once, h2) = counter(&source, "tick", true);

        assert!(source.emit("tick", ()));
        assert!(source.emit("tick", ()));

        assert_eq!(persistent.load(Ordering::SeqCst), 2);
        assert_eq!(once.load(Ordering::SeqCst), 1);
        assert_eq!(source.listener_count("tick"), 1);
        // Already removed by the source itself.
        assert!(!h2.detach());
    }

    #[test]
    fn test_detach_removes_only_its_callback() {
        let source = EventSource::new("test");
        let (a, ha) = counter(&source, "tick", false);
        let (b, _hb) = counter(&source, "tick", false);

        assert!(ha.detach());
        source.emit("tick", ());

        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_typed_callback_ignores_other_payloads() {
        let source = EventSource::new("test");
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        let _h = source.on_typed::<u32, _>("value", move |v| {
            s.fetch_add(*v as usize, Ordering::SeqCst);
        });

        source.emit("value", 5_u32);
        source.emit("value", "not a number");

        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_detach_after_source_dropped() {
        let source = EventSource::new("test");
        let (_, handle) = counter(&source, "tick", false);
        drop(source);
        assert!(!handle.detach());
    }
}
