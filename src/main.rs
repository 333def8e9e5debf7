//! Rampart WAF - entry point

use std::net::SocketAddr;
use std::sync::Arc;

use rampart_waf::ban::BanList;
use rampart_waf::config::WafConfig;
use rampart_waf::error::WafError;
use rampart_waf::filter::build_filter_chain;
use rampart_waf::proxy::{ProxyClient, ProxyConfig};
use rampart_waf::server::Server;
use rampart_waf::state::ClientStore;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let _ = dotenvy::dotenv();

    let config_path = WafConfig::resolve_path(std::env::args().nth(1));
    info!(path = %config_path.display(), "Loading configuration");
    let config = WafConfig::load(&config_path)?;

    let listen_addr: SocketAddr = config.listen_addr.parse().map_err(|e| {
        WafError::Config(format!(
            "Invalid listen address {}: {}",
            config.listen_addr, e
        ))
    })?;

    let store = Arc::new(ClientStore::new());
    let bans = Arc::new(BanList::new());
    let filter_chain = build_filter_chain(&config, store, bans);

    let proxy = ProxyClient::new(ProxyConfig::new(config.upstream_url.clone()))?;

    info!(
        listen = %listen_addr,
        upstream = %config.upstream_url,
        filters = filter_chain.len(),
        "Starting WAF"
    );

    let server = Server::bind(listen_addr, filter_chain, proxy).await?;
    server.run().await?;

    Ok(())
}
