//! Prometheus export
//!
//! The in-process registries stay authoritative. The publisher copies their
//! current values into the `metrics` facade, where the Prometheus exporter
//! (when installed) serves them.

use crate::config::MetricsConfig;
use crate::error::{MonitoringError, Result};
use crate::metrics::{HistogramSnapshot, MetricKey};
use crate::registry::MetricsRegistry;
use metrics::{Label, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

fn labels(key: &MetricKey) -> Vec<Label> {
    key.labels
        .iter()
        .map(|(name, value)| Label::new(name.clone(), value.clone()))
        .collect()
}

fn publish_summary(key: &MetricKey, snapshot: &HistogramSnapshot) {
    for (quantile, value) in [
        ("0.5", snapshot.p50),
        ("0.9", snapshot.p90),
        ("0.95", snapshot.p95),
        ("0.99", snapshot.p99),
    ] {
        let mut labels = labels(key);
        labels.push(Label::new("quantile", quantile));
        metrics::gauge!(key.name.clone(), labels).set(value);
    }
    metrics::gauge!(format!("{}_count", key.name), labels(key)).set(snapshot.count as f64);
    metrics::gauge!(format!("{}_sum", key.name), labels(key)).set(snapshot.sum);
}

/// Prometheus counters are integral; fractional totals from
/// `Counter::increment_by` are rounded to the nearest whole number
fn counter_total(value: f64) -> u64 {
    value.round() as u64
}

/// Mirrors metric registries into the `metrics` facade
pub struct PrometheusPublisher {
    config: MetricsConfig,
    registries: Vec<Arc<MetricsRegistry>>,
}

impl PrometheusPublisher {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            registries: Vec::new(),
        }
    }

    /// Add a registry to every publication
    pub fn with_registry(mut self, registry: Arc<MetricsRegistry>) -> Self {
        self.registries.push(registry);
        self
    }

    /// Install the Prometheus HTTP exporter. A no-op when disabled.
    pub fn install(&self) -> Result<()> {
        if !self.config.prometheus_enabled {
            info!("Prometheus export disabled");
            return Ok(());
        }

        let address: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| MonitoringError::Config(format!("Invalid metrics address: {}", e)))?;

        PrometheusBuilder::new()
            .with_http_listener(address)
            .install()
            .map_err(|e| MonitoringError::Metrics(format!("Failed to setup Prometheus: {}", e)))?;

        describe_runtime_metrics();
        info!("Prometheus exporter listening on {}", address);
        Ok(())
    }

    /// Copy the current value of every registered metric into the facade
    pub fn publish(&self) {
        for registry in &self.registries {
            for counter in registry.counters() {
                let key = counter.key();
                metrics::counter!(key.name.clone(), labels(key))
                    .absolute(counter_total(counter.value()));
            }
            for gauge in registry.gauges() {
                let key = gauge.key();
                metrics::gauge!(key.name.clone(), labels(key)).set(gauge.value());
            }
            for histogram in registry.histograms() {
                publish_summary(histogram.key(), &histogram.snapshot());
            }
            for timer in registry.timers() {
                publish_summary(timer.key(), &timer.snapshot());
            }
        }
        debug!("Published {} metric registries", self.registries.len());
    }

    /// Publish on the configured interval until the handle is aborted
    pub fn spawn(self) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.publish_interval.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                self.publish();
            }
        })
    }
}

fn describe_runtime_metrics() {
    metrics::describe_counter!("connection_attempts", "Connection attempts");
    metrics::describe_counter!("connection_successes", "Successful handshakes");
    metrics::describe_counter!("connection_failures", "Failed connection attempts");
    metrics::describe_counter!(
        "session_connection_failures",
        "Sessions whose handshake failed"
    );
    metrics::describe_counter!("disconnections", "Closed connections");
    metrics::describe_counter!("reconnect_attempts", "Reconnect attempts");
    metrics::describe_gauge!("connections_active", "Open connections");
    metrics::describe_gauge!(
        "connection_duration_ms",
        Unit::Milliseconds,
        "Handshake duration"
    );

    metrics::describe_counter!("requests_total", "Requests issued");
    metrics::describe_counter!("requests_by_method", "Requests issued per method");
    metrics::describe_counter!("request_errors", "Failed requests");
    metrics::describe_counter!("requests_cancelled", "Cancelled requests");
    metrics::describe_counter!("request_timeouts", "Timed out requests");
    metrics::describe_gauge!(
        "request_duration_ms",
        Unit::Milliseconds,
        "Request duration"
    );
    metrics::describe_counter!("tool_calls", "Tool calls issued");
    metrics::describe_counter!("tool_errors", "Failed tool calls");
    metrics::describe_gauge!("tool_duration_ms", Unit::Milliseconds, "Tool call duration");
    metrics::describe_counter!("resource_reads", "Resource reads");
    metrics::describe_counter!("prompt_gets", "Prompt fetches");
    metrics::describe_counter!("notifications_received", "Server notifications");

    metrics::describe_counter!("sessions_created", "Sessions created");
    metrics::describe_counter!("sessions_destroyed", "Sessions destroyed");
    metrics::describe_counter!("sessions_evicted", "Sessions evicted for capacity");
    metrics::describe_counter!("sessions_timed_out", "Sessions destroyed by the idle timer");
    metrics::describe_gauge!("sessions_active", "Open sessions");
    metrics::describe_gauge!(
        "session_lifetime_ms",
        Unit::Milliseconds,
        "Session lifetime"
    );
}
