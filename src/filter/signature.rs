//! Signature matching against known attack payloads
//!
//! The URL path and query string are canonicalized (percent/entity decoding,
//! case folding, whitespace and comment stripping) and tested against a rule
//! list. A match bans the client for a fixed five minutes; there is no
//! escalation and no per-client state.

use std::sync::Arc;
use std::time::Duration;

use hyper::Request;
use percent_encoding::percent_decode_str;
use regex::Regex;
use tracing::warn;

use crate::ban::BanList;
use crate::config::SignatureSettings;
use crate::filter::FilterAction;

/// Fixed ban applied on any signature match.
const SIGNATURE_BAN: Duration = Duration::from_secs(300);

const DEFAULT_PATTERNS: &[(&str, &str)] = &[
    (
        "sql-keywords",
        r"(?i)(union|select|insert|update|delete|drop|create|alter)\s+(\*|[a-z_]+)",
    ),
    ("script-tag", r"(?i)<script[^>]*>.*?</script>"),
    ("javascript-uri", r"(?i)javascript:"),
    ("onerror-handler", r"(?i)onerror\s*="),
    ("onload-handler", r"(?i)onload\s*="),
    ("path-traversal", r"(?i)\.\.[\\/]"),
];

/// One compiled rule. The label shows up in logs.
#[derive(Debug, Clone)]
pub struct SignatureRule {
    pub label: String,
    pub pattern: Regex,
}

impl SignatureRule {
    /// Compile one rule; an invalid pattern is dropped with a warning.
    fn compile(label: &str, pattern: &str) -> Option<Self> {
        match Regex::new(pattern) {
            Ok(compiled) => Some(Self {
                label: label.to_string(),
                pattern: compiled,
            }),
            Err(e) => {
                warn!(pattern = pattern, error = %e, "Invalid signature pattern, skipping");
                None
            }
        }
    }
}

fn default_rules() -> Vec<SignatureRule> {
    DEFAULT_PATTERNS
        .iter()
        .filter_map(|(label, pattern)| SignatureRule::compile(label, pattern))
        .collect()
}

/// Resolved signature-filter parameters.
#[derive(Debug, Clone)]
pub struct SignatureConfig {
    pub rules: Vec<SignatureRule>,
    pub log_matches: bool,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            log_matches: true,
        }
    }
}

impl SignatureConfig {
    /// Resolve a raw config section. An empty pattern list selects the
    /// built-in rules; configured patterns are labeled by their own source
    /// text.
    pub fn from_settings(settings: &SignatureSettings) -> Self {
        let rules = if settings.patterns.is_empty() {
            default_rules()
        } else {
            settings
                .patterns
                .iter()
                .filter_map(|pattern| SignatureRule::compile(pattern, pattern))
                .collect()
        };
        Self {
            rules,
            log_matches: settings.log_matches.unwrap_or(true),
        }
    }
}

/// Canonicalizes a candidate string before matching so trivial encoding
/// tricks cannot hide a payload.
struct Normalizer {
    whitespace: Regex,
    block_comment: Regex,
    line_comment: Regex,
    html_comment: Regex,
}

impl Normalizer {
    fn new() -> Self {
        Self {
            whitespace: Regex::new(r"\s+").unwrap(),
            block_comment: Regex::new(r"(?s)/\*.*?\*/").unwrap(),
            line_comment: Regex::new(r"(?m)--.*$").unwrap(),
            html_comment: Regex::new(r"(?s)<!--.*?-->").unwrap(),
        }
    }

    /// Plus-to-space, percent decode, HTML entity decode, lowercase, trim,
    /// collapse whitespace, strip SQL and HTML comments. In that order:
    /// an encoded `%2B` survives as a literal plus.
    fn normalize(&self, raw: &str) -> String {
        let spaced = raw.replace('+', " ");
        let decoded = percent_decode_str(&spaced).decode_utf8_lossy();
        let unescaped = html_escape::decode_html_entities(decoded.as_ref());
        let lowered = unescaped.to_lowercase();
        let collapsed = self.whitespace.replace_all(lowered.trim(), " ");
        let stripped = self.block_comment.replace_all(&collapsed, "");
        let stripped = self.line_comment.replace_all(&stripped, "");
        self.html_comment.replace_all(&stripped, "").into_owned()
    }
}

pub struct SignatureFilter {
    config: SignatureConfig,
    normalizer: Normalizer,
    bans: Arc<BanList>,
}

impl SignatureFilter {
    pub fn new(config: SignatureConfig, bans: Arc<BanList>) -> Self {
        Self {
            config,
            normalizer: Normalizer::new(),
            bans,
        }
    }

    pub fn check<B>(&self, req: &Request<B>, client_id: &str) -> FilterAction {
        if self.bans.is_banned(client_id) {
            return FilterAction::Forbidden { retry_after: None };
        }
        if client_id.is_empty() {
            return FilterAction::Allow;
        }

        let candidates = [req.uri().path(), req.uri().query().unwrap_or("")];
        for candidate in candidates {
            if candidate.is_empty() {
                continue;
            }
            let normalized = self.normalizer.normalize(candidate);
            let matched = self
                .config
                .rules
                .iter()
                .find(|rule| rule.pattern.is_match(&normalized));

            if let Some(rule) = matched {
                self.bans.ban(client_id, SIGNATURE_BAN);
                if self.config.log_matches {
                    warn!(
                        client = client_id,
                        rule = %rule.label,
                        payload = %normalized,
                        "Signature match, client banned"
                    );
                }
                return FilterAction::Forbidden {
                    retry_after: Some(SIGNATURE_BAN.as_secs()),
                };
            }
        }
        FilterAction::Allow
    }
}
