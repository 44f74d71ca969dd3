//! Configuration surface consumed by the accept/dispatch core.
//!
//! This crate does not own the XML config schema the upstream server reads
//! from disk — that parsing lives with the collaborator that owns the rest of
//! the server. What lands here is the subset of fields the core itself acts
//! on, expressed as a plain `serde`-derived structure that can be loaded from
//! TOML or built programmatically.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the connection core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Listening endpoints to maintain.
    pub listeners: Vec<ListenerConfig>,

    /// TLS certificate + private key, PEM, single file.
    pub cert_file: Option<PathBuf>,
    /// OpenSSL cipher list string.
    #[serde(default = "default_cipher_list")]
    pub cipher_list: String,

    /// IP access-control cache backing files.
    pub ban_file: Option<PathBuf>,
    pub allow_file: Option<PathBuf>,
    pub agent_file: Option<PathBuf>,
    /// How often the backing files above are re-read, in seconds.
    #[serde(default = "default_recheck_interval")]
    pub cache_recheck_interval_secs: u64,

    /// Credentials.
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub relay_username: Option<String>,
    pub relay_password: Option<String>,
    pub source_password: Option<String>,
    /// Accept the deprecated `ice-password` header as a source-auth fallback.
    #[serde(default)]
    pub ice_login: bool,

    /// Peers allowed to override `client.ip` via `X-Forwarded-For`.
    #[serde(default)]
    pub trusted_forwarders: Vec<String>,

    /// URI rewrite rules, tried in order.
    #[serde(default)]
    pub aliases: Vec<UriAlias>,

    /// Space-separated file-extension list excluded from access logging.
    pub access_log_exclude_ext: Option<String>,

    /// Maximum concurrent clients before non-admin GET requests get a 403.
    #[serde(default = "default_client_limit")]
    pub client_limit: usize,

    /// Seconds allowed to complete the request preamble.
    #[serde(default = "default_header_timeout")]
    pub header_timeout: u64,

    /// Milliseconds-per-5 sleep hint applied between accepts.
    #[serde(default)]
    pub new_connections_slowdown: u32,

    /// Mount served for a flash policy-file probe.
    #[serde(default = "default_flashpolicy_mount")]
    pub flashpolicy_mount: String,
}

fn default_cipher_list() -> String {
    "HIGH:!aNULL:!MD5".to_string()
}

fn default_recheck_interval() -> u64 {
    10
}

fn default_client_limit() -> usize {
    1000
}

fn default_header_timeout() -> u64 {
    10
}

fn default_flashpolicy_mount() -> String {
    "/flashpolicy".to_string()
}

impl CoreConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| crate::error::Error::config(format!("reading {:?}: {}", path.as_ref(), e)))?;
        toml::from_str(&text)
            .map_err(|e| crate::error::Error::config(format!("parsing {:?}: {}", path.as_ref(), e)))
    }

    /// Space-separated extension exclusions as an iterator of bare extensions.
    pub fn excluded_extensions(&self) -> impl Iterator<Item = &str> {
        self.access_log_exclude_ext
            .as_deref()
            .into_iter()
            .flat_map(|s| s.split_whitespace())
    }
}

/// One configured listening endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub bind_address: Option<String>,
    pub port: u16,
    #[serde(default = "default_qlen")]
    pub qlen: i32,
    #[serde(default)]
    pub tls: bool,
    /// Shoutcast-style password-first dialogue instead of plain HTTP.
    #[serde(default)]
    pub legacy: bool,
    /// Mount the synthetic SOURCE request is built against, when `legacy`.
    pub legacy_mount: Option<String>,
    pub so_sndbuf: Option<u32>,
    pub so_mss: Option<u32>,
}

fn default_qlen() -> i32 {
    128
}

/// A URI rewrite rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UriAlias {
    pub source: String,
    pub destination: String,
    /// Only apply when the accepting listener's port matches, if set.
    pub port: Option<u16>,
    /// Only apply when the accepting listener's bind address matches, if set.
    pub bind_address: Option<String>,
}

impl UriAlias {
    /// True when this alias applies to a request accepted on `port`/`bind_address`.
    pub fn matches(&self, uri: &str, port: u16, bind_address: Option<&str>) -> bool {
        if self.source != uri {
            return false;
        }
        if let Some(want_port) = self.port {
            if want_port != port {
                return false;
            }
        }
        if let Some(want_bind) = &self.bind_address {
            if Some(want_bind.as_str()) != bind_address {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_matches_unconstrained() {
        let alias = UriAlias { source: "/".into(), destination: "/status.xsl".into(), port: None, bind_address: None };
        assert!(alias.matches("/", 8000, None));
        assert!(alias.matches("/", 8001, Some("127.0.0.1")));
        assert!(!alias.matches("/other", 8000, None));
    }

    #[test]
    fn alias_matches_port_constrained() {
        let alias = UriAlias { source: "/".into(), destination: "/a.xsl".into(), port: Some(8000), bind_address: None };
        assert!(alias.matches("/", 8000, None));
        assert!(!alias.matches("/", 8001, None));
    }

    #[test]
    fn excluded_extensions_split() {
        let mut cfg = CoreConfig::default();
        cfg.access_log_exclude_ext = Some("jpg css js".to_string());
        let exts: Vec<_> = cfg.excluded_extensions().collect();
        assert_eq!(exts, vec!["jpg", "css", "js"]);
    }
}
