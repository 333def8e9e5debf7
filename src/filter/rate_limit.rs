//! Token-bucket rate limiting with escalating bans
//!
//! Each client owns a bucket refilled at a configured rate. Draining it is a
//! violation: the client is banned for `base * multiplier^(violations-1)`,
//! so repeat offenders inside the reset window sit out exponentially longer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hyper::Request;
use tracing::warn;

use crate::ban::BanList;
use crate::config::RateLimitSettings;
use crate::filter::FilterAction;
use crate::state::{self, escalated_ban, ClientStore};

/// Resolved rate-limit parameters.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    pub burst: u32,
    pub base_ban: Duration,
    pub multiplier: f64,
    pub violation_reset: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: state::DEFAULT_RATE,
            burst: state::DEFAULT_BURST,
            base_ban: Duration::from_secs(30),
            multiplier: 2.0,
            violation_reset: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl RateLimitConfig {
    /// Resolve a raw config section; non-positive values fall back to the
    /// built-in defaults.
    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        let defaults = Self::default();
        Self {
            requests_per_second: if settings.requests_per_second > 0.0 {
                settings.requests_per_second
            } else {
                defaults.requests_per_second
            },
            burst: if settings.burst > 0 {
                settings.burst
            } else {
                defaults.burst
            },
            base_ban: if settings.base_ban_seconds > 0 {
                Duration::from_secs(settings.base_ban_seconds)
            } else {
                defaults.base_ban
            },
            multiplier: if settings.multiplier > 0.0 {
                settings.multiplier
            } else {
                defaults.multiplier
            },
            violation_reset: if settings.violation_reset_hours > 0 {
                Duration::from_secs(settings.violation_reset_hours * 3600)
            } else {
                defaults.violation_reset
            },
        }
    }
}

pub struct RateLimitFilter {
    config: RateLimitConfig,
    store: Arc<ClientStore>,
    bans: Arc<BanList>,
}

impl RateLimitFilter {
    pub fn new(config: RateLimitConfig, store: Arc<ClientStore>, bans: Arc<BanList>) -> Self {
        Self {
            config,
            store,
            bans,
        }
    }

    pub fn check<B>(&self, _req: &Request<B>, client_id: &str) -> FilterAction {
        if self.bans.is_banned(client_id) {
            return FilterAction::Forbidden { retry_after: None };
        }

        let state = match self.store.get(client_id) {
            Some(state) => state,
            None => return FilterAction::Allow,
        };

        let now = Instant::now();
        // One lock acquisition covers touch, bucket upkeep, consumption and
        // violation accounting.
        let violations = {
            let mut inner = state.lock();
            inner.touch(now);
            inner.ensure_bucket(self.config.requests_per_second, self.config.burst);
            if inner.bucket.try_consume(now) {
                return FilterAction::Allow;
            }
            inner.rate_limit.record(now, self.config.violation_reset)
        };

        let ban = escalated_ban(self.config.base_ban, self.config.multiplier, violations);
        self.bans.ban(client_id, ban);
        warn!(
            client = client_id,
            violations = violations,
            ban_secs = ban.as_secs(),
            "Rate limit exceeded, client banned"
        );
        FilterAction::RateLimited {
            retry_after: ban.as_secs(),
        }
    }
}
