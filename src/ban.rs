//! Ban registry
//!
//! Shared map of client identifier -> ban expiry. Entries are written by
//! whichever filter decides to ban and consulted by every filter before any
//! other work. Expired entries are removed lazily on lookup; there is no
//! sweeper task.

use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct BanList {
    entries: DashMap<String, Instant>,
}

impl BanList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ban `id` for `duration` from now. An existing entry is overwritten,
    /// so a later shorter ban replaces a longer one.
    pub fn ban(&self, id: &str, duration: Duration) {
        self.entries.insert(id.to_string(), Instant::now() + duration);
    }

    /// Whether `id` is currently banned. A lookup that finds an expired
    /// entry removes it.
    pub fn is_banned(&self, id: &str) -> bool {
        let now = Instant::now();
        {
            match self.entries.get(id) {
                None => return false,
                Some(until) if now < *until => return true,
                Some(_) => {}
            }
        }
        // Read guard released above; the removal predicate re-checks expiry
        // so a concurrent re-ban of the same id survives.
        self.entries.remove_if(id, |_, until| now >= *until);
        false
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
