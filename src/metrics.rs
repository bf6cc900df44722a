//! Prometheus metrics with a label schema derived from the configured proxies.

use crate::classify::Outcome;
use crate::error::ProbeError;
use crate::proxy::ProxyEndpoint;

use log::warn;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::collections::{BTreeMap, BTreeSet};

/// Latency buckets in seconds, denser in the 0.2s to 2s range.
pub const DEFAULT_LATENCY_BUCKETS: [f64; 12] = [
    0.05, 0.1, 0.2, 0.3, 0.4, 0.5, 0.75, 1.0, 1.5, 2.0, 5.0, 10.0,
];

/// Label names owned by the probe itself; custom labels may not reuse them.
pub const RESERVED_LABELS: [&str; 4] = ["proxy_id", "proxy_protocol", "status", "error"];

/// Sorted, deduplicated union of custom label keys across all endpoints.
///
/// Fixed for the lifetime of the process: every sample carries a value for
/// every key, in this order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSchema {
    keys: Vec<String>,
}

impl LabelSchema {
    pub fn derive<'a, I>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = &'a ProxyEndpoint>,
    {
        let keys: BTreeSet<&str> = endpoints
            .into_iter()
            .flat_map(|endpoint| endpoint.labels.keys().map(String::as_str))
            .collect();
        Self {
            keys: keys.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Values for `labels` in schema order; keys the endpoint lacks map to "".
    pub fn resolve(&self, labels: &BTreeMap<String, String>) -> Vec<String> {
        self.keys
            .iter()
            .map(|key| labels.get(key).cloned().unwrap_or_default())
            .collect()
    }
}

/// Request counter and latency histogram for all runners.
///
/// Cheap to share behind an `Arc`; recording is lock-free from the caller's
/// point of view.
pub struct ProbeMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
    schema: LabelSchema,
}

impl ProbeMetrics {
    /// Derive the label schema from `endpoints` and register both metric
    /// families. `buckets` falls back to [`DEFAULT_LATENCY_BUCKETS`].
    pub fn new(endpoints: &[ProxyEndpoint], buckets: Option<&[f64]>) -> Result<Self, ProbeError> {
        let buckets = match buckets {
            Some(b) if !b.is_empty() => b.to_vec(),
            _ => DEFAULT_LATENCY_BUCKETS.to_vec(),
        };
        Self::with_schema(LabelSchema::derive(endpoints), buckets)
    }

    pub fn with_schema(schema: LabelSchema, buckets: Vec<f64>) -> Result<Self, ProbeError> {
        let mut duration_labels = vec!["proxy_id", "proxy_protocol"];
        duration_labels.extend(schema.keys().iter().map(String::as_str));
        let mut request_labels = duration_labels.clone();
        request_labels.extend(["status", "error"]);

        let requests_total = IntCounterVec::new(
            Opts::new("requests_total", "Total number of requests"),
            &request_labels,
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "Request latency distribution")
                .buckets(buckets),
            &duration_labels,
        )?;

        let registry = Registry::new();
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration,
            schema,
        })
    }

    pub fn schema(&self) -> &LabelSchema {
        &self.schema
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Count one attempt. `label_values` must be in schema order, as returned
    /// by [`LabelSchema::resolve`].
    pub fn record_outcome(
        &self,
        proxy_id: &str,
        protocol: &str,
        label_values: &[String],
        outcome: &Outcome,
    ) {
        let error = outcome.error_label();
        let mut values = base_values(proxy_id, protocol, label_values);
        values.push(outcome.status_label());
        values.push(&error);

        match self.requests_total.get_metric_with_label_values(&values) {
            Ok(counter) => counter.inc(),
            Err(e) => warn!("[{}] Dropping requests_total sample: {}", proxy_id, e),
        }
    }

    /// Observe one attempt's latency in seconds.
    pub fn record_latency(
        &self,
        proxy_id: &str,
        protocol: &str,
        label_values: &[String],
        elapsed_secs: f64,
    ) {
        let values = base_values(proxy_id, protocol, label_values);
        match self.request_duration.get_metric_with_label_values(&values) {
            Ok(histogram) => histogram.observe(elapsed_secs),
            Err(e) => warn!("[{}] Dropping request_duration_seconds sample: {}", proxy_id, e),
        }
    }

    /// Render every registered family in the Prometheus text format.
    pub fn encode(&self) -> Result<String, ProbeError> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| ProbeError::config(format!("non-utf8 metrics: {e}")))
    }
}

fn base_values<'a>(proxy_id: &'a str, protocol: &'a str, label_values: &'a [String]) -> Vec<&'a str> {
    let mut values = Vec::with_capacity(label_values.len() + 4);
    values.push(proxy_id);
    values.push(protocol);
    values.extend(label_values.iter().map(String::as_str));
    values
}
