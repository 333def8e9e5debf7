//! Resource-enumeration (BOLA) detection
//!
//! Tracks which object identifiers each client touches inside a sliding
//! window. Scanning many distinct identifiers in a short time is the access
//! pattern of an enumeration attack; crossing the threshold bans the client
//! with the same escalation scheme the rate limiter uses.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hyper::header::COOKIE;
use hyper::Request;
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::ban::BanList;
use crate::config::AnomalySettings;
use crate::filter::FilterAction;
use crate::state::{escalated_ban, ClientStore};

/// Resolved anomaly-detection parameters.
#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    pub window: Duration,
    /// Distinct resources tolerated inside the window; one more is a
    /// violation.
    pub threshold: u32,
    pub base_ban: Duration,
    pub multiplier: f64,
    pub violation_reset: Duration,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            threshold: 20,
            base_ban: Duration::from_secs(300),
            multiplier: 2.0,
            violation_reset: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl AnomalyConfig {
    /// Resolve a raw config section; non-positive values fall back to the
    /// built-in defaults.
    pub fn from_settings(settings: &AnomalySettings) -> Self {
        let defaults = Self::default();
        Self {
            window: if settings.window_seconds > 0 {
                Duration::from_secs(settings.window_seconds)
            } else {
                defaults.window
            },
            threshold: if settings.threshold > 0 {
                settings.threshold
            } else {
                defaults.threshold
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

pub struct AnomalyFilter {
    config: AnomalyConfig,
    store: Arc<ClientStore>,
    bans: Arc<BanList>,
}

impl AnomalyFilter {
    pub fn new(config: AnomalyConfig, store: Arc<ClientStore>, bans: Arc<BanList>) -> Self {
        Self {
            config,
            store,
            bans,
        }
    }

    pub fn check<B>(&self, req: &Request<B>, client_id: &str) -> FilterAction {
        if self.bans.is_banned(client_id) {
            return FilterAction::Forbidden { retry_after: None };
        }

        let state = match self.store.get(client_id) {
            Some(state) => state,
            None => return FilterAction::Allow,
        };

        let resource = extract_resource(req);
        // Captured for log correlation only; decisions key on the client id.
        if let Some(session) = extract_session(req) {
            debug!(client = client_id, session = %session, "Session identifier observed");
        }

        let now = Instant::now();
        let (distinct, violations) = {
            let mut inner = state.lock();
            if let Some(resource) = &resource {
                inner.resource_history.insert(resource.clone(), now);
            }
            inner.prune_history(now, self.config.window);
            let distinct = inner.resource_history.len();
            inner.touch(now);

            if distinct > self.config.threshold as usize {
                let violations = inner.anomaly.record(now, self.config.violation_reset);
                (distinct, Some(violations))
            } else {
                inner.anomaly.reset();
                (distinct, None)
            }
        };

        match violations {
            Some(violations) => {
                let ban = escalated_ban(self.config.base_ban, self.config.multiplier, violations);
                self.bans.ban(client_id, ban);
                warn!(
                    client = client_id,
                    distinct_resources = distinct,
                    violations = violations,
                    ban_secs = ban.as_secs(),
                    "Resource enumeration detected, client banned"
                );
                FilterAction::Forbidden {
                    retry_after: Some(ban.as_secs()),
                }
            }
            None => FilterAction::Allow,
        }
    }
}

/// Resource identifier: `id` query parameter (first occurrence), else the
/// last path segment when it parses as an integer.
fn extract_resource<B>(req: &Request<B>) -> Option<String> {
    if let Some(query) = req.uri().query() {
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            if key == "id" && !value.is_empty() {
                return Some(value.into_owned());
            }
        }
    }

    let segment = req.uri().path().trim_matches('/').rsplit('/').next()?;
    if !segment.is_empty() && segment.parse::<i64>().is_ok() {
        return Some(segment.to_string());
    }
    None
}

/// Session identifier: `X-Session-ID` header, else `sessionid` cookie.
fn extract_session<B>(req: &Request<B>) -> Option<String> {
    if let Some(value) = req.headers().get("x-session-id") {
        if let Ok(value) = value.to_str() {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    let cookies = req.headers().get(COOKIE)?.to_str().ok()?;
    cookies
        .split(';')
        .find_map(|part| part.trim().strip_prefix("sessionid=").map(String::from))
}
