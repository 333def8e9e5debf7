//! Unified error types for the WAF

use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WafError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream connection failed: {0}")]
    Upstream(String),
}

pub type Result<T> = std::result::Result<T, WafError>;
