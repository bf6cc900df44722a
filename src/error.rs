//! Error types for the proxy-probe crate.

use thiserror::Error;

/// Errors raised while loading configuration or starting a probe.
///
/// Nothing on the per-request path returns this type: attempt failures are
/// classified and recorded, never propagated.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Invalid or unsupported configuration.
    #[error("config error: {0}")]
    Config(String),
    /// The HTTP client could not be constructed.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    /// A metric family could not be created or registered.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
    /// Reading the configuration file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file is not valid YAML for the expected schema.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ProbeError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        ProbeError::Config(msg.into())
    }
}
