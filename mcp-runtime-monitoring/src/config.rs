//! Configuration for metrics and logging

use serde::{Deserialize, Serialize};

/// Complete monitoring configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON formatted logs
    pub json: bool,
    /// Verbose diagnostics; forces the default filter to `debug`
    pub debug: bool,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Reservoir capacity for histograms and timers
    pub reservoir_size: usize,
    /// Install the Prometheus exporter
    pub prometheus_enabled: bool,
    /// Prometheus endpoint host
    pub host: String,
    /// Prometheus endpoint port
    pub port: u16,
    /// Interval between registry publications, in seconds
    pub publish_interval: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            debug: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            reservoir_size: crate::metrics::DEFAULT_RESERVOIR_SIZE,
            prometheus_enabled: false,
            host: "127.0.0.1".to_string(),
            port: 9090,
            publish_interval: 15,
        }
    }
}
