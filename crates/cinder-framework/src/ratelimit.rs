//! Token-bucket rate limiting.
//!
//! [`RateLimit`] is a single bucket: `capacity` uses per `cooldown` window.
//! [`RateLimitManager`] keeps one bucket per key, created on first use,
//! and garbage-collects idle buckets with a background sweep that only runs
//! while the manager is non-empty.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::error::Ratelimited;

/// Default period of the idle-bucket sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Shortest sweep period. Shorter periods are raised to this.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

// =============================================================================
// RateLimit
// =============================================================================

/// A single token bucket.
#[derive(Debug, Clone)]
pub struct RateLimit {
    capacity: u32,
    cooldown: Duration,
    remaining: u32,
    reset_at: Instant,
}

impl RateLimit {
    /// Creates a full bucket whose window ends `cooldown` from now.
    pub fn new(capacity: u32, cooldown: Duration) -> Self {
        Self {
            capacity,
            cooldown,
            remaining: capacity,
            reset_at: Instant::now() + cooldown,
        }
    }

    /// Uses per window.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Window length.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Uses left in the current window.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// When the current window ends.
    pub fn reset_at(&self) -> Instant {
        self.reset_at
    }

    /// Changes the capacity. Takes effect at the next reset.
    pub fn set_capacity(&mut self, capacity: u32) {
        self.capacity = capacity;
    }

    /// Changes the cooldown. Takes effect at the next reset.
    pub fn set_cooldown(&mut self, cooldown: Duration) {
        self.cooldown = cooldown;
    }

    /// Whether the current window has ended.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.reset_at
    }

    /// Whether the bucket is empty within a live window.
    pub fn limited(&self) -> bool {
        self.remaining == 0 && !self.expired()
    }

    /// Time until the current window ends, zero once expired.
    pub fn remaining_time(&self) -> Duration {
        self.reset_at.saturating_duration_since(Instant::now())
    }

    /// Consumes one use.
    ///
    /// An expired window is reset first, so the bucket refills only after
    /// the cooldown has fully elapsed.
    pub fn drip(&mut self) -> Result<(), Ratelimited> {
        if self.limited() {
            return Err(Ratelimited {
                remaining_time: self.remaining_time(),
            });
        }
        if self.expired() {
            self.reset();
        }
        self.remaining = self.remaining.saturating_sub(1);
        Ok(())
    }

    /// Refills the bucket and starts a new window.
    pub fn reset(&mut self) {
        self.reset_remaining();
        self.reset_time();
    }

    /// Refills the bucket without touching the window.
    pub fn reset_remaining(&mut self) {
        self.remaining = self.capacity;
    }

    /// Starts a new window without refilling.
    pub fn reset_time(&mut self) {
        self.reset_at = Instant::now() + self.cooldown;
    }
}

// =============================================================================
// RateLimitManager
// =============================================================================

/// Predicate selecting the buckets removed by a sweep.
pub type SweepFilter<K> = Arc<dyn Fn(&K, &RateLimit) -> bool + Send + Sync>;

struct State<K> {
    capacity: u32,
    cooldown: Duration,
    entries: HashMap<K, RateLimit>,
    sweeper: Option<JoinHandle<()>>,
}

struct Shared<K> {
    state: Mutex<State<K>>,
    sweep_interval: Duration,
    filter: SweepFilter<K>,
}

impl<K> Shared<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Removes matching buckets. Returns how many were removed and whether
    /// the manager is now empty, in which case the sweeper is disarmed.
    fn sweep(&self, from_task: bool) -> (usize, bool) {
        let mut state = self.state.lock();
        let before = state.entries.len();
        let filter = &self.filter;
        state.entries.retain(|key, limit| !filter(key, limit));
        let removed = before - state.entries.len();

        let drained = state.entries.is_empty();
        if drained && let Some(task) = state.sweeper.take() {
            // The task exits on its own after reporting the drain.
            if !from_task {
                task.abort();
            }
        }
        (removed, drained)
    }
}

/// Per-key token buckets with shared settings and idle collection.
///
/// Capacity and cooldown changes apply to every tracked bucket, not only
/// to buckets created afterwards.
pub struct RateLimitManager<K> {
    shared: Arc<Shared<K>>,
}

impl<K> RateLimitManager<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Creates a manager sweeping expired buckets every
    /// [`DEFAULT_SWEEP_INTERVAL`].
    pub fn new(capacity: u32, cooldown: Duration) -> Self {
        Self::with_sweep(capacity, cooldown, DEFAULT_SWEEP_INTERVAL, |_, limit| limit.expired())
    }

    /// Creates a manager with a custom sweep period and filter. The period
    /// is at least [`MIN_SWEEP_INTERVAL`].
    pub fn with_sweep<F>(capacity: u32, cooldown: Duration, sweep_interval: Duration, filter: F) -> Self
    where
        F: Fn(&K, &RateLimit) -> bool + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    capacity,
                    cooldown,
                    entries: HashMap::new(),
                    sweeper: None,
                }),
                sweep_interval: sweep_interval.max(MIN_SWEEP_INTERVAL),
                filter: Arc::new(filter),
            }),
        }
    }

    /// Shared capacity.
    pub fn capacity(&self) -> u32 {
        self.shared.state.lock().capacity
    }

    /// Shared cooldown.
    pub fn cooldown(&self) -> Duration {
        self.shared.state.lock().cooldown
    }

    /// Sweep period.
    pub fn sweep_interval(&self) -> Duration {
        self.shared.sweep_interval
    }

    /// Sets the capacity of the manager and of every tracked bucket.
    pub fn set_capacity(&self, capacity: u32) {
        let mut state = self.shared.state.lock();
        state.capacity = capacity;
        for limit in state.entries.values_mut() {
            limit.set_capacity(capacity);
        }
    }

    /// Sets the cooldown of the manager and of every tracked bucket.
    pub fn set_cooldown(&self, cooldown: Duration) {
        let mut state = self.shared.state.lock();
        state.cooldown = cooldown;
        for limit in state.entries.values_mut() {
            limit.set_cooldown(cooldown);
        }
    }

    /// Returns the bucket for `key`, creating it if needed.
    pub fn acquire(&self, key: K) -> RateLimit {
        self.with(key, |limit| limit.clone())
    }

    /// Consumes one use from the bucket for `key`, creating it if needed.
    pub fn drip(&self, key: K) -> Result<(), Ratelimited> {
        self.with(key, RateLimit::drip)
    }

    /// Runs `f` on the bucket for `key`, creating it if needed.
    pub fn with<R>(&self, key: K, f: impl FnOnce(&mut RateLimit) -> R) -> R {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        let (capacity, cooldown) = (state.capacity, state.cooldown);
        let inserted = !state.entries.contains_key(&key);
        let limit = state
            .entries
            .entry(key)
            .or_insert_with(|| RateLimit::new(capacity, cooldown));
        let result = f(limit);

        if inserted {
            self.arm(state);
        }
        result
    }

    /// Returns a snapshot of the bucket for `key`.
    pub fn get(&self, key: &K) -> Option<RateLimit> {
        self.shared.state.lock().entries.get(key).cloned()
    }

    /// Removes the bucket for `key`. Disarms the sweep when this empties
    /// the manager.
    pub fn remove(&self, key: &K) -> Option<RateLimit> {
        let mut state = self.shared.state.lock();
        let removed = state.entries.remove(key);
        if state.entries.is_empty()
            && let Some(task) = state.sweeper.take()
        {
            task.abort();
        }
        removed
    }

    /// Whether a bucket exists for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.shared.state.lock().entries.contains_key(key)
    }

    /// Number of tracked buckets.
    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    /// Whether no bucket is tracked.
    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().entries.is_empty()
    }

    /// Whether the background sweep is armed.
    pub fn is_sweeping(&self) -> bool {
        self.shared.state.lock().sweeper.is_some()
    }

    /// Runs a sweep now. Returns the number of removed buckets.
    pub fn sweep(&self) -> usize {
        self.shared.sweep(false).0
    }

    fn arm(&self, state: &mut State<K>) {
        if state.sweeper.is_some() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No tokio runtime, rate limit sweep not armed");
            return;
        };

        let weak: Weak<Shared<K>> = Arc::downgrade(&self.shared);
        let period = self.shared.sweep_interval;
        state.sweeper = Some(runtime.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let (removed, drained) = shared.sweep(true);
                trace!(removed, drained, "Rate limit sweep");
                if drained {
                    break;
                }
            }
        }));
        debug!(period_ms = period.as_millis() as u64, "Rate limit sweep armed");
    }
}

impl<K> Drop for RateLimitManager<K> {
    fn drop(&mut self) {
        if let Some(task) = self.shared.state.lock().sweeper.take() {
            task.abort();
        }
    }
}

impl<K> fmt::Debug for RateLimitManager<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("RateLimitManager")
            .field("capacity", &state.capacity)
            .field("cooldown", &state.cooldown)
            .field("entries", &state.entries.len())
            .field("sweeping", &state.sweeper.is_some())
            .finish()
    }
}
