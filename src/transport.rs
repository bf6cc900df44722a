//! Proxy transport construction and address redaction.

use crate::error::ProbeError;
use crate::proxy::ProxyProtocol;

use std::time::Duration;
use url::Url;

const USER_AGENT: &str = concat!("proxy-probe/", env!("CARGO_PKG_VERSION"));

/// A reusable dialing strategy bound to one proxy endpoint.
///
/// Building a transport performs no network I/O. Clients produced from it
/// share a connection pool and are safe for concurrent use.
#[derive(Debug, Clone)]
pub struct Transport {
    protocol: ProxyProtocol,
    proxy: reqwest::Proxy,
    redacted: String,
}

impl Transport {
    /// Protocol this transport tunnels through.
    pub fn protocol(&self) -> ProxyProtocol {
        self.protocol
    }

    /// Proxy `host:port` with any credentials removed, for logging.
    pub fn redacted_address(&self) -> &str {
        &self.redacted
    }

    /// Build an HTTP client routed through this transport. `timeout` bounds a
    /// whole attempt: connect, proxy handshake, request and response body.
    pub fn client(&self, timeout: Duration) -> Result<reqwest::Client, ProbeError> {
        let client = reqwest::Client::builder()
            .proxy(self.proxy.clone())
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(client)
    }
}

/// Build a transport for `address` (`[user[:password]@]host:port`, no scheme).
///
/// SOCKS5 connections perform the handshake per connection and let the proxy
/// resolve the target host. HTTP proxies receive absolute-form requests, with
/// credentials sent as `Proxy-Authorization` by reqwest.
pub fn build(protocol: &str, address: &str) -> Result<Transport, ProbeError> {
    let protocol: ProxyProtocol = protocol.parse()?;

    if address.contains("://") {
        return Err(ProbeError::config(
            "proxy address must not include a scheme",
        ));
    }

    let scheme = match protocol {
        ProxyProtocol::Socks5 => "socks5h",
        ProxyProtocol::Http => "http",
    };
    let url = Url::parse(&format!("{scheme}://{address}"))
        .map_err(|e| ProbeError::config(format!("invalid proxy address: {e}")))?;

    if url.host_str().map_or(true, str::is_empty) {
        return Err(ProbeError::config(
            "proxy address (host:port) is not specified",
        ));
    }

    let proxy = reqwest::Proxy::all(url.as_str())?;

    Ok(Transport {
        protocol,
        proxy,
        redacted: redact_address(protocol.as_str(), address),
    })
}

/// Strip credentials from a proxy address, returning `host:port`.
///
/// Never fails: input that cannot be parsed is returned unchanged.
pub fn redact_address(protocol: &str, address: &str) -> String {
    let scheme = protocol.to_ascii_lowercase();
    let url = match Url::parse(&format!("{scheme}://{address}")) {
        Ok(url) => url,
        Err(_) => return address.to_string(),
    };

    match url.host_str() {
        Some(host) if !host.is_empty() => match url.port_or_known_default() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        },
        _ => address.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn host_port(protocol: &str, address: &str) -> (String, Option<u16>) {
        let url = Url::parse(&format!("{protocol}://{address}")).unwrap();
        (url.host_str().unwrap().to_string(), url.port_or_known_default())
    }

    #[test]
    fn builds_socks5_with_credentials() {
        let transport = assert_ok!(build("socks5", "user:secret@proxy.example.com:1080"));
        assert_eq!(transport.protocol(), ProxyProtocol::Socks5);
        assert_eq!(transport.redacted_address(), "proxy.example.com:1080");
        assert!(!transport.redacted_address().contains("secret"));
    }

    #[test]
    fn builds_socks5_with_username_only() {
        let transport = assert_ok!(build("socks5", "user@127.0.0.1:1080"));
        assert_eq!(transport.redacted_address(), "127.0.0.1:1080");
    }

    #[test]
    fn builds_http_proxy() {
        let transport = assert_ok!(build("HTTP", "user:pass@proxy.example.com:8080"));
        assert_eq!(transport.protocol(), ProxyProtocol::Http);
        assert_eq!(transport.redacted_address(), "proxy.example.com:8080");
        assert_ok!(transport.client(Duration::from_secs(5)));
    }

    #[test]
    fn unsupported_protocol_fails() {
        let err = build("socks4", "proxy.example.com:1080").unwrap_err();
        assert!(matches!(err, ProbeError::Config(_)));
        assert!(err.to_string().contains("unsupported proxy protocol"));
    }

    #[test]
    fn missing_host_fails() {
        for address in ["", ":1080", "user:pass@"] {
            let err = build("socks5", address).unwrap_err();
            assert!(matches!(err, ProbeError::Config(_)), "{address:?} -> {err}");
        }
    }

    #[test]
    fn scheme_in_address_fails() {
        let err = build("socks5", "socks5://proxy.example.com:1080").unwrap_err();
        assert!(matches!(err, ProbeError::Config(_)));
    }

    #[test]
    fn redacts_credentials() {
        let cases = [
            ("socks5", "username:password@proxy.example.com:1080", "proxy.example.com:1080"),
            ("http", "user:pass@proxy.example.com:8080", "proxy.example.com:8080"),
            ("socks5", "proxy.example.com:1080", "proxy.example.com:1080"),
            ("http", "proxy.example.com:8080", "proxy.example.com:8080"),
            ("socks5", "username@proxy.example.com:1080", "proxy.example.com:1080"),
            ("http", "user:p@ss:w0rd@proxy.example.com:8080", "proxy.example.com:8080"),
            ("socks5", "user:pw@[::1]:1080", "[::1]:1080"),
        ];
        for (protocol, address, want) in cases {
            assert_eq!(redact_address(protocol, address), want, "{protocol} {address}");
        }
    }

    #[test]
    fn redaction_never_panics_on_malformed_input() {
        assert_eq!(redact_address("socks5", ""), "");
        assert_eq!(redact_address("socks5", "host:notaport"), "host:notaport");
        assert!(!redact_address("socks5", "invalid://url").is_empty());
        assert_eq!(redact_address("", "user:pw@host:1"), "user:pw@host:1");
    }

    #[test]
    fn redacted_address_parses_to_original_host_port() {
        let cases = [
            ("socks5", "alice:s3cr3t@proxy.example.com:1080"),
            ("http", "bob:hunter2@10.0.0.1:3128"),
            ("socks5", "carol@[2001:db8::1]:1080"),
        ];
        for (protocol, address) in cases {
            let redacted = redact_address(protocol, address);
            assert_eq!(host_port(protocol, &redacted), host_port(protocol, address));
        }
    }
}
