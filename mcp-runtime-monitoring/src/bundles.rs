//! Domain metric bundles
//!
//! Each bundle resolves its handles from a [`MetricsRegistry`] once at
//! construction, so the hot path never touches the registry map.

use crate::config::MetricsConfig;
use crate::metrics::{Counter, Gauge, MetricKey, Timer};
use crate::registry::{MetricsRegistry, RegistrySnapshot};
use std::sync::Arc;
use std::time::Duration;

/// Connection health for protocol clients
#[derive(Debug, Clone)]
pub struct ConnectionMetrics {
    pub attempts: Counter,
    pub successes: Counter,
    pub failures: Counter,
    pub disconnections: Counter,
    pub reconnect_attempts: Counter,
    pub active: Gauge,
    pub connect_duration: Timer,
}

impl ConnectionMetrics {
    pub fn new(registry: &MetricsRegistry) -> Self {
        Self {
            attempts: registry.counter("connection_attempts"),
            successes: registry.counter("connection_successes"),
            failures: registry.counter("connection_failures"),
            disconnections: registry.counter("disconnections"),
            reconnect_attempts: registry.counter("reconnect_attempts"),
            active: registry.gauge("connections_active"),
            connect_duration: registry.timer("connection_duration_ms"),
        }
    }

    pub fn record_success(&self, elapsed: Duration) {
        self.successes.increment();
        self.active.increment(1.0);
        self.connect_duration.record(elapsed);
    }

    pub fn record_failure(&self, elapsed: Duration) {
        self.failures.increment();
        self.connect_duration.record(elapsed);
    }

    pub fn record_disconnect(&self) {
        self.disconnections.increment();
        self.active.decrement(1.0);
    }
}

/// How a request finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

/// Request traffic for protocol clients
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    registry: Arc<MetricsRegistry>,
    pub total: Counter,
    pub errors: Counter,
    pub cancelled: Counter,
    pub timeouts: Counter,
    pub duration: Timer,
    pub tool_calls: Counter,
    pub tool_errors: Counter,
    pub tool_duration: Timer,
    pub resource_reads: Counter,
    pub prompt_gets: Counter,
    pub notifications_received: Counter,
}

impl RequestMetrics {
    pub fn new(registry: Arc<MetricsRegistry>) -> Self {
        Self {
            total: registry.counter("requests_total"),
            errors: registry.counter("request_errors"),
            cancelled: registry.counter("requests_cancelled"),
            timeouts: registry.counter("request_timeouts"),
            duration: registry.timer("request_duration_ms"),
            tool_calls: registry.counter("tool_calls"),
            tool_errors: registry.counter("tool_errors"),
            tool_duration: registry.timer("tool_duration_ms"),
            resource_reads: registry.counter("resource_reads"),
            prompt_gets: registry.counter("prompt_gets"),
            notifications_received: registry.counter("notifications_received"),
            registry,
        }
    }

    /// Per-method request counter
    pub fn method(&self, method: &str) -> Counter {
        self.registry
            .counter(MetricKey::new("requests_by_method").with_label("method", method))
    }

    /// Count a request as started
    pub fn record_start(&self, method: &str) {
        self.total.increment();
        self.method(method).increment();
    }

    /// Record the single terminal outcome of a request
    pub fn record_outcome(&self, outcome: RequestOutcome, elapsed: Duration) {
        self.duration.record(elapsed);
        match outcome {
            RequestOutcome::Completed => {}
            RequestOutcome::Failed => self.errors.increment(),
            RequestOutcome::TimedOut => {
                self.errors.increment();
                self.timeouts.increment();
            }
            RequestOutcome::Cancelled => self.cancelled.increment(),
        }
    }
}

/// Metric family for protocol clients
#[derive(Debug, Clone)]
pub struct ClientMetrics {
    registry: Arc<MetricsRegistry>,
    pub connection: ConnectionMetrics,
    pub requests: RequestMetrics,
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self::with_registry(Arc::new(MetricsRegistry::new()))
    }

    /// Family backed by a registry sized from `config`
    pub fn from_config(config: &MetricsConfig) -> Self {
        Self::with_registry(Arc::new(MetricsRegistry::with_reservoir_size(
            config.reservoir_size,
        )))
    }

    pub fn with_registry(registry: Arc<MetricsRegistry>) -> Self {
        Self {
            connection: ConnectionMetrics::new(&registry),
            requests: RequestMetrics::new(registry.clone()),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.registry.snapshot()
    }

    pub fn reset(&self) {
        self.registry.reset();
    }
}

/// Metric family for the session manager
#[derive(Debug, Clone)]
pub struct SessionMetrics {
    registry: Arc<MetricsRegistry>,
    pub sessions_created: Counter,
    pub sessions_destroyed: Counter,
    pub sessions_evicted: Counter,
    pub sessions_timed_out: Counter,
    pub sessions_active: Gauge,
    pub connection_failures: Counter,
    pub session_lifetime: Timer,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::with_registry(Arc::new(MetricsRegistry::new()))
    }

    /// Family backed by a registry sized from `config`
    pub fn from_config(config: &MetricsConfig) -> Self {
        Self::with_registry(Arc::new(MetricsRegistry::with_reservoir_size(
            config.reservoir_size,
        )))
    }

    pub fn with_registry(registry: Arc<MetricsRegistry>) -> Self {
        Self {
            sessions_created: registry.counter("sessions_created"),
            sessions_destroyed: registry.counter("sessions_destroyed"),
            sessions_evicted: registry.counter("sessions_evicted"),
            sessions_timed_out: registry.counter("sessions_timed_out"),
            sessions_active: registry.gauge("sessions_active"),
            connection_failures: registry.counter("session_connection_failures"),
            session_lifetime: registry.timer("session_lifetime_ms"),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.registry.snapshot()
    }

    pub fn reset(&self) {
        self.registry.reset();
    }
}
