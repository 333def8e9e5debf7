//! Inbound HTTP surface
//!
//! Accepts TCP connections, parses HTTP/1.1 via hyper, and runs one task per
//! connection. Every request passes the filter chain; cleared requests are
//! forwarded upstream, rejected ones are answered directly.

use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::error::{Result, WafError};
use crate::filter::{FilterAction, FilterChain};
use crate::proxy::ProxyClient;

pub struct Server {
    listener: TcpListener,
    addr: SocketAddr,
    filter_chain: Arc<FilterChain>,
    proxy: Arc<ProxyClient>,
}

impl Server {
    pub async fn bind(
        addr: SocketAddr,
        filter_chain: FilterChain,
        proxy: ProxyClient,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| WafError::Bind { addr, source: e })?;

        let actual_addr = listener
            .local_addr()
            .map_err(|e| WafError::Config(format!("Failed to get local address: {}", e)))?;

        info!(addr = %actual_addr, "WAF bound");

        Ok(Self {
            listener,
            addr: actual_addr,
            filter_chain: Arc::new(filter_chain),
            proxy: Arc::new(proxy),
        })
    }

    pub async fn run(self) -> Result<()> {
        info!(addr = %self.addr, filters = self.filter_chain.len(), "Accepting connections");

        loop {
            let (stream, remote_addr) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!(%e, "Failed to accept connection");
                    continue;
                }
            };

            let io = TokioIo::new(stream);
            let filter_chain = self.filter_chain.clone();
            let proxy = self.proxy.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    handle_request(req, remote_addr, filter_chain.clone(), proxy.clone())
                });
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(%remote_addr, %e, "Connection error");
                }
            });
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Filter then forward. Rejections come straight from the chain; a forward
/// failure maps to 502 and never tears the connection down.
async fn handle_request(
    req: Request<Incoming>,
    remote_addr: SocketAddr,
    filter_chain: Arc<FilterChain>,
    proxy: Arc<ProxyClient>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    info!(%remote_addr, method = %req.method(), uri = %req.uri(), "Request received");

    let action = filter_chain.execute(&req, remote_addr);

    let response = match action {
        FilterAction::Allow => match proxy.forward(req, remote_addr).await {
            Ok(response) => response,
            Err(e) => {
                error!(%remote_addr, error = %e, "Proxy forward failed");
                Response::builder()
                    .status(StatusCode::BAD_GATEWAY)
                    .header("Content-Type", "text/plain")
                    .body(Full::new(Bytes::from("Bad Gateway")))
                    .unwrap()
            }
        },
        other => filter_chain.action_to_response(other),
    };

    Ok(response)
}
