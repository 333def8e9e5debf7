//! Request filtering pipeline
//!
//! A closed set of filters executed in configured order. Every filter runs
//! the shared ban check before anything else; the first non-Allow action
//! short-circuits the chain and is rendered as an HTTP rejection.

pub mod anomaly;
pub mod rate_limit;
pub mod signature;

pub use anomaly::{AnomalyConfig, AnomalyFilter};
pub use rate_limit::{RateLimitConfig, RateLimitFilter};
pub use signature::{SignatureConfig, SignatureFilter};

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Request, Response, StatusCode};
use tracing::warn;

use crate::ban::BanList;
use crate::config::WafConfig;
use crate::state::ClientStore;

/// Action to take after filter inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterAction {
    /// Allow request to proceed
    Allow,
    /// Reject with 403. `retry_after` is present when this rejection issued
    /// a fresh ban, absent when an already-banned client was short-circuited.
    Forbidden { retry_after: Option<u64> },
    /// Reject with 429 and a Retry-After header
    RateLimited { retry_after: u64 },
}

impl fmt::Display for FilterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterAction::Allow => write!(f, "Allow"),
            FilterAction::Forbidden {
                retry_after: Some(secs),
            } => write!(f, "Forbidden(retry_after={})", secs),
            FilterAction::Forbidden { retry_after: None } => write!(f, "Forbidden"),
            FilterAction::RateLimited { retry_after } => {
                write!(f, "RateLimited(retry_after={})", retry_after)
            }
        }
    }
}

/// The filters this WAF can run. Adding a filter means adding a variant here
/// and a branch in [`build_filter_chain`].
pub enum WafFilter {
    RateLimit(RateLimitFilter),
    Anomaly(AnomalyFilter),
    Signature(SignatureFilter),
}

impl WafFilter {
    /// Inspect one request. Generic over the body type because filters only
    /// look at the request head; unit tests use `Request<()>`.
    pub fn check<B>(&self, req: &Request<B>, client_id: &str) -> FilterAction {
        match self {
            WafFilter::RateLimit(f) => f.check(req, client_id),
            WafFilter::Anomaly(f) => f.check(req, client_id),
            WafFilter::Signature(f) => f.check(req, client_id),
        }
    }

    /// Filter name for logging
    pub fn name(&self) -> &'static str {
        match self {
            WafFilter::RateLimit(_) => "rate_limit",
            WafFilter::Anomaly(_) => "anomaly",
            WafFilter::Signature(_) => "signature",
        }
    }
}

/// Client identifier for a connection: the peer IP without the port.
pub fn client_ip(remote_addr: SocketAddr) -> String {
    remote_addr.ip().to_string()
}

/// Filters executed sequentially; first non-Allow action wins.
pub struct FilterChain {
    filters: Vec<WafFilter>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    pub fn add_filter(mut self, filter: WafFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn execute<B>(&self, req: &Request<B>, remote_addr: SocketAddr) -> FilterAction {
        let client_id = client_ip(remote_addr);
        for filter in &self.filters {
            let action = filter.check(req, &client_id);
            if action != FilterAction::Allow {
                tracing::info!(
                    filter = filter.name(),
                    client = %client_id,
                    action = %action,
                    "Filter blocked request"
                );
                return action;
            }
        }
        FilterAction::Allow
    }

    pub fn action_to_response(&self, action: FilterAction) -> Response<Full<Bytes>> {
        match action {
            FilterAction::Allow => Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::from("OK")))
                .unwrap(),
            FilterAction::Forbidden { retry_after } => {
                let mut builder = Response::builder()
                    .status(StatusCode::FORBIDDEN)
                    .header("Content-Type", "text/plain");
                if let Some(secs) = retry_after {
                    builder = builder.header("Retry-After", secs.to_string());
                }
                builder.body(Full::new(Bytes::from("Forbidden"))).unwrap()
            }
            FilterAction::RateLimited { retry_after } => Response::builder()
                .status(StatusCode::TOO_MANY_REQUESTS)
                .header("Retry-After", retry_after.to_string())
                .header("Content-Type", "text/plain")
                .body(Full::new(Bytes::from("Too Many Requests")))
                .unwrap(),
        }
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the chain described by `config.filter_chain`, wiring every filter
/// to the shared client store and ban registry. Unknown names are skipped.
pub fn build_filter_chain(
    config: &WafConfig,
    store: Arc<ClientStore>,
    bans: Arc<BanList>,
) -> FilterChain {
    let mut chain = FilterChain::new();
    for name in &config.filter_chain {
        let filter = match name.as_str() {
            "rate_limit" => WafFilter::RateLimit(RateLimitFilter::new(
                RateLimitConfig::from_settings(&config.rate_limit),
                store.clone(),
                bans.clone(),
            )),
            "anomaly" => WafFilter::Anomaly(AnomalyFilter::new(
                AnomalyConfig::from_settings(&config.anomaly),
                store.clone(),
                bans.clone(),
            )),
            "signature" => WafFilter::Signature(SignatureFilter::new(
                SignatureConfig::from_settings(&config.signature),
                bans.clone(),
            )),
            other => {
                warn!(filter = other, "Unknown filter in chain, skipping");
                continue;
            }
        };
        chain = chain.add_filter(filter);
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_chain() -> FilterChain {
        let config = WafConfig::default();
        build_filter_chain(
            &config,
            Arc::new(ClientStore::new()),
            Arc::new(BanList::new()),
        )
    }

    fn request(uri: &str) -> Request<()> {
        Request::builder().uri(uri).body(()).unwrap()
    }

    #[test]
    fn test_filter_action_display() {
        assert_eq!(FilterAction::Allow.to_string(), "Allow");
        assert_eq!(
            FilterAction::Forbidden { retry_after: None }.to_string(),
            "Forbidden"
        );
        assert_eq!(
            FilterAction::Forbidden {
                retry_after: Some(300)
            }
            .to_string(),
            "Forbidden(retry_after=300)"
        );
        assert_eq!(
            FilterAction::RateLimited { retry_after: 30 }.to_string(),
            "RateLimited(retry_after=30)"
        );
    }

    #[test]
    fn test_client_ip_strips_port() {
        assert_eq!(client_ip("192.168.1.9:4242".parse().unwrap()), "192.168.1.9");
        assert_eq!(client_ip("[::1]:8080".parse().unwrap()), "::1");
    }

    #[test]
    fn test_action_to_response_forbidden() {
        let chain = FilterChain::new();

        let response = chain.action_to_response(FilterAction::Forbidden { retry_after: None });
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get("Retry-After").is_none());

        let response = chain.action_to_response(FilterAction::Forbidden {
            retry_after: Some(300),
        });
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "300");
    }

    #[test]
    fn test_action_to_response_rate_limited() {
        let chain = FilterChain::new();
        let response = chain.action_to_response(FilterAction::RateLimited { retry_after: 30 });

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "30");
    }

    #[test]
    fn test_build_chain_default_order() {
        let chain = default_chain();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.filters[0].name(), "anomaly");
        assert_eq!(chain.filters[1].name(), "rate_limit");
        assert_eq!(chain.filters[2].name(), "signature");
    }

    #[test]
    fn test_build_chain_skips_unknown_names() {
        let mut config = WafConfig::default();
        config.filter_chain = vec!["rate_limit".to_string(), "bogus".to_string()];

        let chain = build_filter_chain(
            &config,
            Arc::new(ClientStore::new()),
            Arc::new(BanList::new()),
        );
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.filters[0].name(), "rate_limit");
    }

    #[test]
    fn test_execute_allows_clean_request() {
        let chain = default_chain();
        let action = chain.execute(&request("/items/1"), "127.0.0.1:9999".parse().unwrap());
        assert_eq!(action, FilterAction::Allow);
    }

    #[test]
    fn test_execute_returns_first_block() {
        let config = WafConfig::default();
        let bans = Arc::new(BanList::new());
        let chain = build_filter_chain(&config, Arc::new(ClientStore::new()), bans.clone());

        let req = request("/search?q=%3Cscript%3Ealert(1)%3C%2Fscript%3E");
        let action = chain.execute(&req, "127.0.0.1:9999".parse().unwrap());

        assert_eq!(
            action,
            FilterAction::Forbidden {
                retry_after: Some(300)
            }
        );
        assert!(bans.is_banned("127.0.0.1"));
    }

    #[test]
    fn test_empty_chain_allows() {
        let chain = FilterChain::new();
        assert!(chain.is_empty());
        let action = chain.execute(&request("/"), "127.0.0.1:9999".parse().unwrap());
        assert_eq!(action, FilterAction::Allow);
    }
}
