use anyhow::{bail, Context};
use clap::Parser;
use log::{info, warn};
use proxy_probe::config::DEFAULT_CONFIG_PATH;
use proxy_probe::{server, spawn_runners, ProbeConfig, ProbeMetrics};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Probe a target URL through SOCKS5 and HTTP proxies and export Prometheus metrics.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Exit as soon as any proxy runner fails to start.
    #[arg(long)]
    fail_fast: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ProbeConfig::load(&args.config).with_context(|| {
        format!("Error loading proxy configuration from {}", args.config.display())
    })?;

    let buckets = config.latency_buckets();
    let endpoints = config.endpoints();
    let metrics = Arc::new(ProbeMetrics::new(&endpoints, Some(buckets.as_slice()))?);
    info!("Using latency buckets: {:?}", buckets);
    info!("Label keys: {:?}", metrics.schema().keys());

    info!("Configuration:");
    info!("  Target URL: {}", config.default_target_url);
    info!("  Request interval: {:?}", config.request_interval);
    info!("  Request timeout: {:?}", config.request_timeout);
    info!("  Metrics port: {}", config.metrics_port);
    info!("  Number of proxies: {}", endpoints.len());
    if let Some(max) = config.max_in_flight {
        info!("  Max in-flight requests per proxy: {}", max);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let mut metrics_server = tokio::spawn(server::serve(Arc::clone(&metrics), addr));

    let (_runners, mut failures) = spawn_runners(&config, metrics);
    let total = endpoints.len();
    let mut failed = 0;

    loop {
        tokio::select! {
            Some(failure) = failures.recv() => {
                failed += 1;
                if args.fail_fast {
                    bail!("[{}] proxy runner failed: {}", failure.proxy_id, failure.error);
                }
                if failed == total {
                    bail!("all {} proxy runners failed to start", total);
                }
                warn!("{}/{} proxy runners failed to start, continuing with the rest", failed, total);
            }
            result = &mut metrics_server => {
                return match result {
                    Ok(Ok(())) => bail!("metrics server stopped"),
                    Ok(Err(e)) => Err(e).context("metrics server failed"),
                    Err(e) => Err(e).context("metrics server task failed"),
                };
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}
