//! Per-client security state
//!
//! Concurrent registry mapping a client identifier to its mutable state:
//! token bucket, per-concern escalation counters, resource-access history.
//! Registry lookups are sharded (unrelated clients never contend); every
//! mutable field of one record is guarded by that record's own lock, held
//! for the duration of a single read-modify-write step.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};

/// Default token refill rate (requests per second).
pub const DEFAULT_RATE: f64 = 5.0;
/// Default bucket capacity (burst size).
pub const DEFAULT_BURST: u32 = 20;

/// Upper bound applied to escalated ban durations.
pub const MAX_BAN: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Token bucket: refills continuously at `rate` tokens/second up to
/// `capacity`, starts full.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    rate: f64,
    capacity: u32,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate: f64, capacity: u32) -> Self {
        Self {
            tokens: capacity as f64,
            rate,
            capacity,
            last_refill: Instant::now(),
        }
    }

    /// Refill for the elapsed time, then take one token if available.
    pub fn try_consume(&mut self, now: Instant) -> bool {
        let elapsed = now.duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity as f64);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whether this bucket was built with the given parameters.
    pub fn matches(&self, rate: f64, capacity: u32) -> bool {
        self.rate == rate && self.capacity == capacity
    }

    pub fn available(&self) -> f64 {
        self.tokens
    }
}

/// Escalation counter for one concern (rate limiting or anomaly detection).
#[derive(Debug, Clone, Default)]
pub struct ViolationRecord {
    count: u32,
    last_at: Option<Instant>,
}

impl ViolationRecord {
    /// Count a violation at `now`. The counter restarts from zero first if
    /// more than `reset_window` passed since the previous violation.
    /// Returns the updated count.
    pub fn record(&mut self, now: Instant, reset_window: Duration) -> u32 {
        if let Some(last) = self.last_at {
            if now.duration_since(last) > reset_window {
                self.count = 0;
            }
        }
        self.count += 1;
        self.last_at = Some(now);
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.last_at = None;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Ban duration for the N-th temporally-clustered violation:
/// `base * multiplier^(violation - 1)`, so consecutive violations yield
/// base, base*m, base*m^2, ...
///
/// The exponent and the result are capped so hostile multiplier values from
/// configuration cannot produce a non-finite duration.
pub fn escalated_ban(base: Duration, multiplier: f64, violation: u32) -> Duration {
    let exponent = violation.saturating_sub(1).min(32);
    let secs = base.as_secs_f64() * multiplier.powi(exponent as i32);
    Duration::from_secs_f64(secs.min(MAX_BAN.as_secs_f64()))
}

/// Mutable per-client fields. Only reachable through [`ClientState::lock`].
#[derive(Debug)]
pub struct ClientStateInner {
    /// Updated on every filter touch.
    pub last_seen: Instant,
    /// Admission bucket for the rate-limit filter.
    pub bucket: TokenBucket,
    /// Escalation counters: one pair per concern.
    pub rate_limit: ViolationRecord,
    pub anomaly: ViolationRecord,
    /// Resource id -> last access, pruned to the anomaly window.
    pub resource_history: HashMap<String, Instant>,
}

impl ClientStateInner {
    fn new() -> Self {
        Self {
            last_seen: Instant::now(),
            bucket: TokenBucket::new(DEFAULT_RATE, DEFAULT_BURST),
            rate_limit: ViolationRecord::default(),
            anomaly: ViolationRecord::default(),
            resource_history: HashMap::new(),
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_seen = now;
    }

    /// Re-create the bucket when the configured rate/burst differ from the
    /// stored ones (a lazily-created default bucket picks up the filter's
    /// parameters on first use).
    pub fn ensure_bucket(&mut self, rate: f64, capacity: u32) {
        if !self.bucket.matches(rate, capacity) {
            self.bucket = TokenBucket::new(rate, capacity);
        }
    }

    /// Drop history entries older than `window`.
    pub fn prune_history(&mut self, now: Instant, window: Duration) {
        self.resource_history
            .retain(|_, seen| now.duration_since(*seen) <= window);
    }
}

/// Per-identifier record; the inner fields are guarded by this record's own
/// lock.
#[derive(Debug)]
pub struct ClientState {
    id: String,
    inner: Mutex<ClientStateInner>,
}

impl ClientState {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            inner: Mutex::new(ClientStateInner::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Acquire this record's lock for one read-modify-write sequence. The
    /// guard must not outlive the filter step that took it.
    pub fn lock(&self) -> MutexGuard<'_, ClientStateInner> {
        self.inner.lock()
    }
}

/// Concurrent registry of client records.
#[derive(Debug, Default)]
pub struct ClientStore {
    clients: DashMap<String, Arc<ClientState>>,
}

impl ClientStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the shared record for `id`, creating it with defaults on first
    /// reference. Returns `None` for an empty identifier; filters must pass
    /// the request through in that case.
    pub fn get(&self, id: &str) -> Option<Arc<ClientState>> {
        if id.is_empty() {
            return None;
        }
        if let Some(state) = self.clients.get(id) {
            return Some(state.clone());
        }
        let entry = self
            .clients
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(ClientState::new(id)));
        Some(entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
