//! Forwarding to the upstream backend
//!
//! Cleared requests are handed to a pooled hyper client. The proxy rewrites
//! forwarding headers (X-Forwarded-For, X-Real-IP, Host), strips hop-by-hop
//! headers, applies an upstream timeout, and buffers the upstream response
//! before returning it to the inbound connection.

use std::net::SocketAddr;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{HeaderMap, Request, Response, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::error::{Result, WafError};

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Proxy configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Upstream backend URL (e.g., "http://localhost:8081")
    pub upstream_url: String,
    /// Upstream request timeout
    pub timeout: Duration,
    /// Keep the client's Host header instead of the upstream authority
    pub preserve_host: bool,
}

impl ProxyConfig {
    pub fn new(upstream_url: String) -> Self {
        Self {
            upstream_url,
            timeout: Duration::from_secs(30),
            preserve_host: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_preserve_host(mut self, preserve: bool) -> Self {
        self.preserve_host = preserve;
        self
    }
}

/// Pooled client for one upstream.
pub struct ProxyClient {
    config: ProxyConfig,
    client: Client<HttpConnector, Incoming>,
    scheme: String,
    authority: String,
}

impl ProxyClient {
    /// Build a client for the configured upstream. The URL must carry an
    /// authority; scheme defaults to http.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let upstream_uri: Uri = config
            .upstream_url
            .parse()
            .map_err(|e| WafError::Config(format!("Invalid upstream URL: {}", e)))?;

        let scheme = upstream_uri.scheme_str().unwrap_or("http").to_string();
        let authority = match upstream_uri.authority() {
            Some(authority) => authority.to_string(),
            None => {
                return Err(WafError::Config(format!(
                    "Upstream URL has no host: {}",
                    config.upstream_url
                )));
            }
        };

        let client = Client::builder(TokioExecutor::new()).build_http();

        Ok(Self {
            config,
            client,
            scheme,
            authority,
        })
    }

    pub async fn forward(
        &self,
        mut req: Request<Incoming>,
        client_addr: SocketAddr,
    ) -> Result<Response<Full<Bytes>>> {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let target = format!("{}://{}{}", self.scheme, self.authority, path_and_query);
        *req.uri_mut() = target
            .parse()
            .map_err(|e| WafError::Upstream(format!("Failed to build upstream URI: {}", e)))?;

        self.rewrite_headers(req.headers_mut(), client_addr);

        let response = tokio::time::timeout(self.config.timeout, self.client.request(req))
            .await
            .map_err(|_| WafError::Upstream("Upstream request timed out".to_string()))?
            .map_err(|e| WafError::Upstream(format!("Upstream request failed: {}", e)))?;

        let (parts, body) = response.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|e| WafError::Upstream(format!("Failed to read upstream response: {}", e)))?
            .to_bytes();

        Ok(Response::from_parts(parts, Full::new(bytes)))
    }

    fn rewrite_headers(&self, headers: &mut HeaderMap, client_addr: SocketAddr) {
        let client_ip = client_addr.ip().to_string();

        match headers.get("x-forwarded-for") {
            Some(existing) => {
                if let Ok(value) = existing.to_str() {
                    let appended = format!("{}, {}", value, client_ip);
                    headers.insert("x-forwarded-for", appended.parse().unwrap());
                }
            }
            None => {
                headers.insert("x-forwarded-for", client_ip.parse().unwrap());
            }
        }

        headers.insert("x-real-ip", client_ip.parse().unwrap());

        if !self.config.preserve_host {
            headers.insert("host", self.authority.parse().unwrap());
        }

        for header in HOP_BY_HOP_HEADERS {
            headers.remove(*header);
        }
    }
}
