//! Configuration for the probe.

use crate::error::ProbeError;
use crate::metrics::{DEFAULT_LATENCY_BUCKETS, RESERVED_LABELS};
use crate::proxy::ProxyEndpoint;

use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "proxies.yaml";

const DEFAULT_METRICS_PORT: u16 = 8080;

/// One proxy entry as written in the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyEntry {
    /// Optional stable identity; defaults to `proxy_<n>`.
    #[serde(default)]
    pub id: Option<String>,
    /// "socks5" or "http".
    pub protocol: String,
    /// `[user[:password]@]host:port`, without a scheme.
    pub proxy: String,
    /// Overrides the default target URL for this proxy.
    #[serde(default)]
    pub target_url: Option<String>,
    /// Custom labels attached to every metric of this proxy.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Configuration for the probe.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// URL probed through every proxy without its own `target_url`.
    #[serde(alias = "target_url", default)]
    pub default_target_url: String,
    /// Interval between attempts per proxy.
    #[serde(rename = "request_interval_ms", deserialize_with = "millis")]
    pub request_interval: Duration,
    /// Ceiling for one whole attempt.
    #[serde(deserialize_with = "seconds")]
    pub request_timeout: Duration,
    /// Port of the `/metrics` endpoint.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Histogram boundaries in seconds; empty means the default ladder.
    #[serde(default)]
    pub latency_buckets: Vec<f64>,
    /// Cap on concurrent attempts per proxy; unbounded when absent.
    #[serde(default)]
    pub max_in_flight: Option<usize>,
    /// Configured proxies, in order.
    #[serde(default)]
    pub proxies: Vec<ProxyEntry>,
}

fn default_metrics_port() -> u16 {
    DEFAULT_METRICS_PORT
}

fn millis<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_millis)
}

fn seconds<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_secs)
}

impl ProbeConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProbeConfigBuilder {
        ProbeConfigBuilder::new()
    }

    /// Read, parse and validate a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProbeError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self, ProbeError> {
        let config: ProbeConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Latency buckets, falling back to the default ladder.
    pub fn latency_buckets(&self) -> Vec<f64> {
        if self.latency_buckets.is_empty() {
            DEFAULT_LATENCY_BUCKETS.to_vec()
        } else {
            self.latency_buckets.clone()
        }
    }

    /// Resolve proxy entries into endpoints, assigning `proxy_<n>` ids.
    pub fn endpoints(&self) -> Vec<ProxyEndpoint> {
        self.proxies
            .iter()
            .enumerate()
            .map(|(i, entry)| ProxyEndpoint {
                id: entry
                    .id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("proxy_{}", i + 1)),
                protocol: entry.protocol.clone(),
                address: entry.proxy.clone(),
                target_url: entry.target_url.clone().filter(|url| !url.is_empty()),
                labels: entry.labels.clone(),
            })
            .collect()
    }

    /// Check everything that can be checked without touching the network.
    ///
    /// Proxy protocols are not checked here; an unsupported protocol fails
    /// only the runner started for it.
    pub fn validate(&self) -> Result<(), ProbeError> {
        if self.proxies.is_empty() {
            return Err(ProbeError::config("no proxies configured in config file"));
        }
        if self.request_interval.is_zero() {
            return Err(ProbeError::config("request_interval_ms must be greater than zero"));
        }
        if self.request_timeout.is_zero() {
            return Err(ProbeError::config("request_timeout must be greater than zero"));
        }
        if let Some(0) = self.max_in_flight {
            return Err(ProbeError::config("max_in_flight must be greater than zero"));
        }
        validate_buckets(&self.latency_buckets)?;

        let mut ids = HashSet::new();
        for endpoint in self.endpoints() {
            if endpoint.target_url(&self.default_target_url).is_empty() {
                return Err(ProbeError::config(format!(
                    "[{}] no target_url and no default_target_url",
                    endpoint.id
                )));
            }
            for key in endpoint.labels.keys() {
                validate_label_key(key)
                    .map_err(|msg| ProbeError::config(format!("[{}] {}", endpoint.id, msg)))?;
            }
            if !ids.insert(endpoint.id.clone()) {
                return Err(ProbeError::config(format!("duplicate proxy id: {}", endpoint.id)));
            }
        }
        Ok(())
    }
}

fn validate_buckets(buckets: &[f64]) -> Result<(), ProbeError> {
    if buckets.iter().any(|b| !b.is_finite() || *b <= 0.0) {
        return Err(ProbeError::config("latency_buckets must be finite and positive"));
    }
    if buckets.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ProbeError::config("latency_buckets must be strictly ascending"));
    }
    Ok(())
}

fn validate_label_key(key: &str) -> Result<(), String> {
    let mut chars = key.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !valid {
        return Err(format!("invalid label name: {key:?}"));
    }
    if key.starts_with("__") {
        return Err(format!("label name {key:?} is reserved for internal use"));
    }
    if RESERVED_LABELS.contains(&key) {
        return Err(format!("label name {key:?} collides with a built-in label"));
    }
    Ok(())
}

/// Builder for `ProbeConfig`.
pub struct ProbeConfigBuilder {
    default_target_url: Option<String>,
    request_interval: Option<Duration>,
    request_timeout: Option<Duration>,
    metrics_port: Option<u16>,
    latency_buckets: Vec<f64>,
    max_in_flight: Option<usize>,
    proxies: Vec<ProxyEntry>,
}

impl ProbeConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            default_target_url: None,
            request_interval: None,
            request_timeout: None,
            metrics_port: None,
            latency_buckets: Vec::new(),
            max_in_flight: None,
            proxies: Vec::new(),
        }
    }

    /// Set the URL probed by proxies without their own target.
    pub fn target_url(mut self, url: impl Into<String>) -> Self {
        self.default_target_url = Some(url.into());
        self
    }

    /// Set the interval between attempts.
    pub fn request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = Some(interval);
        self
    }

    /// Set the per-attempt timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the metrics port.
    pub fn metrics_port(mut self, port: u16) -> Self {
        self.metrics_port = Some(port);
        self
    }

    /// Set custom latency buckets.
    pub fn latency_buckets(mut self, buckets: Vec<f64>) -> Self {
        self.latency_buckets = buckets;
        self
    }

    /// Cap concurrent attempts per proxy.
    pub fn max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = Some(max);
        self
    }

    /// Add a proxy.
    pub fn proxy(mut self, protocol: impl Into<String>, address: impl Into<String>) -> Self {
        self.proxies.push(ProxyEntry {
            id: None,
            protocol: protocol.into(),
            proxy: address.into(),
            target_url: None,
            labels: BTreeMap::new(),
        });
        self
    }

    /// Add a fully specified proxy entry.
    pub fn proxy_entry(mut self, entry: ProxyEntry) -> Self {
        self.proxies.push(entry);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<ProbeConfig, ProbeError> {
        let config = ProbeConfig {
            default_target_url: self.default_target_url.unwrap_or_default(),
            request_interval: self.request_interval.unwrap_or(Duration::from_secs(1)),
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(10)),
            metrics_port: self.metrics_port.unwrap_or(DEFAULT_METRICS_PORT),
            latency_buckets: self.latency_buckets,
            max_in_flight: self.max_in_flight,
            proxies: self.proxies,
        };
        config.validate()?;
        Ok(config)
    }
}

impl Default for ProbeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
