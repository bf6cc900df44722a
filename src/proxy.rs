//! Proxy endpoint representation and protocol.

use crate::error::ProbeError;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Outbound proxy protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyProtocol {
    /// SOCKS5 tunnel; the proxy resolves the target host name.
    Socks5,
    /// Plain HTTP forward proxy.
    Http,
}

impl ProxyProtocol {
    /// Name used in configuration and in the `proxy_protocol` metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Socks5 => "socks5",
            ProxyProtocol::Http => "http",
        }
    }
}

impl FromStr for ProxyProtocol {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "socks5" => Ok(ProxyProtocol::Socks5),
            "http" => Ok(ProxyProtocol::Http),
            _ => Err(ProbeError::config(format!("unsupported proxy protocol: {s}"))),
        }
    }
}

impl fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured outbound relay through which probe requests are routed.
///
/// Immutable once loaded. The protocol is kept as the raw configured string so
/// that an unsupported value fails only the runner started for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyEndpoint {
    /// Sequential (`proxy_<n>`) or user-assigned identity.
    pub id: String,
    /// Configured protocol, e.g. "socks5" or "http".
    pub protocol: String,
    /// `[user[:password]@]host:port`, without a scheme.
    pub address: String,
    /// Target URL override for this proxy only.
    pub target_url: Option<String>,
    /// Custom metric labels.
    pub labels: BTreeMap<String, String>,
}

impl ProxyEndpoint {
    /// Create an endpoint with no labels and no target override.
    pub fn new(
        id: impl Into<String>,
        protocol: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            protocol: protocol.into(),
            address: address.into(),
            target_url: None,
            labels: BTreeMap::new(),
        }
    }

    /// Attach a custom label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Route this proxy's probes to `url` instead of the default target.
    pub fn with_target_url(mut self, url: impl Into<String>) -> Self {
        self.target_url = Some(url.into());
        self
    }

    /// The URL this proxy probes, falling back to `default_url`.
    pub fn target_url<'a>(&'a self, default_url: &'a str) -> &'a str {
        match self.target_url.as_deref() {
            Some(url) if !url.is_empty() => url,
            _ => default_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_parses_case_insensitively() {
        assert_eq!("SOCKS5".parse::<ProxyProtocol>().unwrap(), ProxyProtocol::Socks5);
        assert_eq!("http".parse::<ProxyProtocol>().unwrap(), ProxyProtocol::Http);
    }

    #[test]
    fn unknown_protocol_is_a_config_error() {
        let err = "https".parse::<ProxyProtocol>().unwrap_err();
        assert!(matches!(err, ProbeError::Config(_)));
        assert!(err.to_string().contains("unsupported proxy protocol"));
    }

    #[test]
    fn target_url_override() {
        let ep = ProxyEndpoint::new("p1", "http", "proxy.example.com:8080");
        assert_eq!(ep.target_url("https://default.example"), "https://default.example");

        let ep = ep.with_target_url("https://other.example");
        assert_eq!(ep.target_url("https://default.example"), "https://other.example");

        let ep = ProxyEndpoint::new("p2", "http", "h:1").with_target_url("");
        assert_eq!(ep.target_url("https://default.example"), "https://default.example");
    }
}
