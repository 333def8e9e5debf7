//! Rampart - adaptive web application firewall
//!
//! Reverse proxy that inspects requests before they reach the upstream:
//! - token-bucket rate limiting with escalating bans
//! - resource-enumeration (BOLA) detection over a sliding window
//! - signature matching with payload normalization
//!
//! All client state is in-memory and process-lifetime scoped.

pub mod ban;
pub mod config;
pub mod error;
pub mod filter;
pub mod proxy;
pub mod server;
pub mod state;
