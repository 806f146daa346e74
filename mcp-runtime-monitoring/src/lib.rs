//! Metrics and logging for the MCP session runtime
//!
//! - Metric primitives with exact aggregates and reservoir-sampled quantiles
//! - Registries with get-or-create identity, snapshots and reset
//! - Connection, request and session metric bundles
//! - A lazily created process-wide default
//! - Prometheus publishing and `tracing` subscriber setup

pub mod bundles;
pub mod config;
pub mod error;
pub mod global;
pub mod metrics;
pub mod prometheus;
pub mod registry;
pub mod tracing_setup;


pub use bundles::{ClientMetrics, ConnectionMetrics, RequestMetrics, RequestOutcome, SessionMetrics};
pub use config::{LoggingConfig, MetricsConfig, MonitoringConfig};
pub use error::{MonitoringError, Result};
pub use global::{GlobalMetrics, GlobalSnapshot};
pub use self::metrics::{
    Counter, Gauge, Histogram, HistogramSnapshot, MetricKey, Timer, TimerGuard, TimerObservation,
};
pub use prometheus::PrometheusPublisher;
pub use registry::{MetricsRegistry, RegistrySnapshot};
pub use tracing_setup::TracingSetup;
