//! Integration tests for the signature filter

use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use rampart_waf::ban::BanList;
use rampart_waf::filter::{FilterAction, FilterChain, SignatureConfig, SignatureFilter, WafFilter};

async fn run_test_server(chain: Arc<FilterChain>) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };

            let io = TokioIo::new(stream);
            let chain = chain.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let chain = chain.clone();
                    async move { handle_request(req, chain, remote_addr).await }
                });

                let _ = http1::Builder::new().serve_connection(io, service).await;
            });
        }
    });

    (addr, handle)
}

async fn handle_request(
    req: Request<Incoming>,
    chain: Arc<FilterChain>,
    remote_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let action = chain.execute(&req, remote_addr);

    let response = match action {
        FilterAction::Allow => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("OK")))
            .unwrap(),
        other => chain.action_to_response(other),
    };

    Ok(response)
}

fn signature_chain() -> Arc<FilterChain> {
    let bans = Arc::new(BanList::new());
    Arc::new(
        FilterChain::new().add_filter(WafFilter::Signature(SignatureFilter::new(
            SignatureConfig::default(),
            bans,
        ))),
    )
}

fn http_client() -> Client<HttpConnector, Full<Bytes>> {
    Client::builder(hyper_util::rt::TokioExecutor::new()).build_http()
}

#[tokio::test]
async fn test_encoded_script_payload_banned() {
    let (addr, server_handle) = run_test_server(signature_chain()).await;
    let client = http_client();

    let response = client
        .get(
            format!(
                "http://{}/search?q=%3Cscript%3Ealert(1)%3C%2Fscript%3E",
                addr
            )
            .parse()
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.headers().get("retry-after").unwrap(), "300");

    // Benign follow-up is rejected by the ban, without the retry hint.
    let response = client
        .get(format!("http://{}/items/1", addr).parse().unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(!response.headers().contains_key("retry-after"));

    server_handle.abort();
}

#[tokio::test]
async fn test_sql_injection_payload_banned() {
    let (addr, server_handle) = run_test_server(signature_chain()).await;
    let client = http_client();

    let response = client
        .get(
            format!("http://{}/products?q=1+UNION+SELECT+password", addr)
                .parse()
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    server_handle.abort();
}

#[tokio::test]
async fn test_path_traversal_banned() {
    let (addr, server_handle) = run_test_server(signature_chain()).await;
    let client = http_client();

    let response = client
        .get(
            format!("http://{}/static/..%2F..%2Fetc%2Fpasswd", addr)
                .parse()
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    server_handle.abort();
}

#[tokio::test]
async fn test_benign_traffic_passes() {
    let (addr, server_handle) = run_test_server(signature_chain()).await;
    let client = http_client();

    for uri in [
        "/items/42?page=2",
        "/search?q=rust+tutorials",
        "/search?q=selection+criteria",
        "/health",
    ] {
        let response = client
            .get(format!("http://{}{}", addr, uri).parse().unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{} should pass", uri);
    }

    server_handle.abort();
}
