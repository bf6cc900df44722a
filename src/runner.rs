//! Per-proxy probe loop.
//!
//! Each configured proxy gets its own task that fires one attempt immediately
//! and one more at every tick of a fixed interval. Attempts are detached, so a
//! slow or hung request never delays the next tick. With no
//! `max_in_flight` cap the number of outstanding requests against one proxy
//! grows without bound whenever the interval is shorter than the observed
//! latency; that trade favours timing fidelity over resource bounding.

use crate::classify::{classify, Failure, Outcome};
use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::metrics::ProbeMetrics;
use crate::proxy::ProxyEndpoint;
use crate::transport;

use log::{error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time;

/// Timing and target for one runner.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// URL requested on every attempt.
    pub target_url: String,
    /// Time between attempts.
    pub interval: Duration,
    /// Ceiling for one whole attempt.
    pub timeout: Duration,
    /// Cap on concurrent attempts; `None` means unbounded.
    pub max_in_flight: Option<usize>,
}

impl RunnerSettings {
    pub fn for_endpoint(config: &ProbeConfig, endpoint: &ProxyEndpoint) -> Self {
        Self {
            target_url: endpoint.target_url(&config.default_target_url).to_string(),
            interval: config.request_interval,
            timeout: config.request_timeout,
            max_in_flight: config.max_in_flight,
        }
    }
}

/// A runner that could not be started.
#[derive(Debug)]
pub struct RunnerFailure {
    pub proxy_id: String,
    pub error: ProbeError,
}

/// State shared by every attempt of one runner.
struct Probe {
    id: String,
    protocol: &'static str,
    label_values: Vec<String>,
    target_url: String,
    client: reqwest::Client,
    metrics: Arc<ProbeMetrics>,
    permits: Option<Arc<Semaphore>>,
}

/// The periodic request loop bound to one proxy endpoint.
pub struct Runner {
    probe: Arc<Probe>,
    interval: Duration,
}

impl Runner {
    /// Build the transport and client for `endpoint`. No network I/O happens
    /// here; an error means the endpoint is misconfigured.
    pub fn new(
        endpoint: &ProxyEndpoint,
        settings: &RunnerSettings,
        metrics: Arc<ProbeMetrics>,
    ) -> Result<Self, ProbeError> {
        if settings.interval.is_zero() {
            return Err(ProbeError::config("request interval must be greater than zero"));
        }
        let transport = transport::build(&endpoint.protocol, &endpoint.address)?;
        let client = transport.client(settings.timeout)?;

        info!(
            "[{}] Starting proxy runner (protocol: {}, proxy: {})",
            endpoint.id,
            transport.protocol(),
            transport.redacted_address()
        );

        let probe = Probe {
            id: endpoint.id.clone(),
            protocol: transport.protocol().as_str(),
            label_values: metrics.schema().resolve(&endpoint.labels),
            target_url: settings.target_url.clone(),
            client,
            metrics,
            permits: settings.max_in_flight.map(|n| Arc::new(Semaphore::new(n))),
        };

        Ok(Self {
            probe: Arc::new(probe),
            interval: settings.interval,
        })
    }

    pub fn id(&self) -> &str {
        &self.probe.id
    }

    /// Custom label values in schema order.
    pub fn label_values(&self) -> &[String] {
        &self.probe.label_values
    }

    /// Run a single attempt to completion and record it.
    pub async fn probe_once(&self) -> Outcome {
        self.probe.attempt().await
    }

    /// Fire an attempt now and at every tick, forever.
    pub async fn run(self) {
        // The first tick completes immediately.
        let mut ticker = time::interval(self.interval);
        loop {
            ticker.tick().await;
            let probe = Arc::clone(&self.probe);
            tokio::spawn(async move {
                probe.attempt().await;
            });
        }
    }
}

impl Probe {
    async fn attempt(&self) -> Outcome {
        let _permit = match &self.permits {
            Some(permits) => Arc::clone(permits).acquire_owned().await.ok(),
            None => None,
        };

        let start = Instant::now();
        let result = self.client.get(&self.target_url).send().await;
        let elapsed = start.elapsed().as_secs_f64();

        let outcome = match result {
            Err(err) => {
                // The URL is dropped so its text cannot sway classification.
                let err = err.without_url();
                let outcome = classify(Some(Failure::Transport(&err)), None);
                warn!(
                    "[{}] Error making request to {}: {}",
                    self.id,
                    self.target_url,
                    describe(err)
                );
                outcome
            }
            Ok(response) => {
                let status = response.status();
                match drain(response).await {
                    Err(err) => {
                        let err = err.without_url();
                        let outcome = classify(Some(Failure::Body(&err)), Some(status));
                        warn!("[{}] Error reading response: {}", self.id, describe(err));
                        outcome
                    }
                    Ok(()) => {
                        let outcome = classify(None, Some(status));
                        if !outcome.is_success() {
                            warn!(
                                "[{}] HTTP error {} for request to {}",
                                self.id,
                                status.as_u16(),
                                self.target_url
                            );
                        }
                        outcome
                    }
                }
            }
        };

        self.metrics
            .record_outcome(&self.id, self.protocol, &self.label_values, &outcome);
        self.metrics
            .record_latency(&self.id, self.protocol, &self.label_values, elapsed);
        outcome
    }
}

/// Render an error with its whole cause chain, e.g.
/// "error sending request: client error (Connect): Connection refused".
fn describe<E>(err: E) -> String
where
    E: std::error::Error + Send + Sync + 'static,
{
    format!("{:#}", anyhow::Error::from(err))
}

/// Read and discard the body so the connection can return to the pool.
async fn drain(mut response: reqwest::Response) -> Result<(), reqwest::Error> {
    while response.chunk().await?.is_some() {}
    Ok(())
}

/// Start a runner task for `endpoint`. A runner that fails to build reports
/// on `failures` and exits; siblings are unaffected.
pub fn start(
    endpoint: ProxyEndpoint,
    settings: RunnerSettings,
    metrics: Arc<ProbeMetrics>,
    failures: mpsc::UnboundedSender<RunnerFailure>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match Runner::new(&endpoint, &settings, metrics) {
            Ok(runner) => {
                drop(failures);
                runner.run().await;
            }
            Err(error) => {
                error!("[{}] Error creating proxy transport: {}", endpoint.id, error);
                let _ = failures.send(RunnerFailure {
                    proxy_id: endpoint.id,
                    error,
                });
            }
        }
    })
}

/// Start one runner per configured proxy.
///
/// The receiver yields a [`RunnerFailure`] for every runner that could not
/// start, and closes once every runner has either failed or started.
pub fn spawn_runners(
    config: &ProbeConfig,
    metrics: Arc<ProbeMetrics>,
) -> (Vec<JoinHandle<()>>, mpsc::UnboundedReceiver<RunnerFailure>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handles = config
        .endpoints()
        .into_iter()
        .map(|endpoint| {
            let settings = RunnerSettings::for_endpoint(config, &endpoint);
            start(endpoint, settings, Arc::clone(&metrics), tx.clone())
        })
        .collect();
    (handles, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RunnerSettings {
        RunnerSettings {
            target_url: "http://probe.test/".to_string(),
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(1),
            max_in_flight: None,
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("error sending request")]
    struct SendFailed(#[source] std::io::Error);

    #[test]
    fn describe_includes_cause_chain() {
        let err = SendFailed(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(describe(err), "error sending request: connection refused");
    }

    #[test]
    fn resolves_label_values_against_schema() {
        let endpoints = vec![
            ProxyEndpoint::new("us", "socks5", "127.0.0.1:1080").with_label("region", "us"),
            ProxyEndpoint::new("eu", "http", "127.0.0.1:8080")
                .with_label("region", "eu")
                .with_label("tier", "gold"),
        ];
        let metrics = Arc::new(ProbeMetrics::new(&endpoints, None).unwrap());

        let runner = Runner::new(&endpoints[0], &settings(), Arc::clone(&metrics)).unwrap();
        assert_eq!(runner.id(), "us");
        assert_eq!(runner.label_values(), ["us", ""]);

        let runner = Runner::new(&endpoints[1], &settings(), metrics).unwrap();
        assert_eq!(runner.label_values(), ["eu", "gold"]);
    }

    #[test]
    fn settings_use_endpoint_target_override() {
        let config = ProbeConfig::builder()
            .target_url("https://default.example")
            .request_interval(Duration::from_millis(250))
            .proxy("http", "p:8080")
            .build()
            .unwrap();
        let endpoint = config.endpoints()[0].clone().with_target_url("https://other.example");
        let settings = RunnerSettings::for_endpoint(&config, &endpoint);
        assert_eq!(settings.target_url, "https://other.example");
        assert_eq!(settings.interval, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn build_failure_is_reported_not_fatal() {
        let config = ProbeConfig::builder()
            .target_url("http://probe.test/")
            .request_interval(Duration::from_secs(60))
            .proxy("socks4", "127.0.0.1:1080")
            .proxy("http", "127.0.0.1:9")
            .build()
            .unwrap();
        let metrics = Arc::new(ProbeMetrics::new(&config.endpoints(), None).unwrap());

        let (handles, mut failures) = spawn_runners(&config, metrics);
        assert_eq!(handles.len(), 2);

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.proxy_id, "proxy_1");
        assert!(matches!(failure.error, ProbeError::Config(_)));

        // The healthy runner started and dropped its sender.
        assert!(failures.recv().await.is_none());
        assert!(!handles[1].is_finished());

        for handle in handles {
            handle.abort();
        }
    }
}
