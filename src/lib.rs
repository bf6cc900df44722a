//! # proxy-probe
//!
//! A synthetic-monitoring probe that sends HTTP requests to a target through
//! SOCKS5 and HTTP proxies and exports the results as Prometheus metrics.
//!
//! Every configured proxy gets an independent runner that fires one request
//! per interval. Each attempt is classified into a stable error category and
//! recorded in a request counter and a latency histogram, labelled with the
//! proxy's id, protocol and custom labels.

pub mod classify;
pub mod config;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod runner;
pub mod server;
pub mod transport;

pub use classify::{classify, classify_error, Category, Failure, Outcome};
pub use config::{ProbeConfig, ProbeConfigBuilder, ProxyEntry};
pub use error::ProbeError;
pub use metrics::{LabelSchema, ProbeMetrics, DEFAULT_LATENCY_BUCKETS};
pub use proxy::{ProxyEndpoint, ProxyProtocol};
pub use runner::{spawn_runners, Runner, RunnerFailure, RunnerSettings};
pub use transport::{redact_address, Transport};
