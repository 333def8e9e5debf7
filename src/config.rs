//! Configuration loading
//!
//! Reads an optional JSON file. Every field has a default, so an absent file
//! runs the WAF with built-in behavior; a file that exists but cannot be read
//! or parsed is a startup error. The path comes from the first CLI argument,
//! then the `WAF_CONFIG` environment variable, then `waf_config.json`.

use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::error::{Result, WafError};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "WAF_CONFIG";
/// Fallback config file path.
pub const DEFAULT_CONFIG_PATH: &str = "waf_config.json";

/// Top-level configuration. Immutable after load.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WafConfig {
    pub listen_addr: String,
    pub upstream_url: String,
    /// Filter names in execution order.
    pub filter_chain: Vec<String>,
    pub rate_limit: RateLimitSettings,
    pub anomaly: AnomalySettings,
    pub signature: SignatureSettings,
}

impl Default for WafConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            upstream_url: "http://localhost:8081".to_string(),
            filter_chain: vec![
                "anomaly".to_string(),
                "rate_limit".to_string(),
                "signature".to_string(),
            ],
            rate_limit: RateLimitSettings::default(),
            anomaly: AnomalySettings::default(),
            signature: SignatureSettings::default(),
        }
    }
}

/// Raw `rate_limit` section. Zero means "not set"; the filter substitutes
/// its built-in default for any non-positive value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub requests_per_second: f64,
    pub burst: u32,
    pub base_ban_seconds: u64,
    pub multiplier: f64,
    pub violation_reset_hours: u64,
}

/// Raw `anomaly` section, same zero-means-unset convention.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnomalySettings {
    pub window_seconds: u64,
    pub threshold: u32,
    pub base_ban_seconds: u64,
    pub multiplier: f64,
    pub violation_reset_hours: u64,
}

/// Raw `signature` section. An empty pattern list selects the built-in rule
/// set; `log_matches` left out means on.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SignatureSettings {
    pub patterns: Vec<String>,
    pub log_matches: Option<bool>,
}

impl WafConfig {
    /// Load from `path`. An absent file yields the defaults; any other read
    /// or parse failure is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(WafError::Config(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        serde_json::from_str(&raw)
            .map_err(|e| WafError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Resolve the config file path: CLI argument, then `WAF_CONFIG`, then
    /// the compiled-in fallback.
    pub fn resolve_path(cli_arg: Option<String>) -> PathBuf {
        if let Some(arg) = cli_arg {
            return PathBuf::from(arg);
        }
        match env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }
}
