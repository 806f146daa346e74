//! Metric primitives: counters, gauges, histograms and timers
//!
//! Every primitive is a cheap cloneable handle onto shared state, so the
//! instance returned by a [`MetricsRegistry`](crate::MetricsRegistry) can be
//! stored by any number of owners and still update one value.

use crate::error::{MonitoringError, Result};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default histogram reservoir capacity
pub const DEFAULT_RESERVOIR_SIZE: usize = 1028;

/// Metric identity: a name plus an ordered label set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricKey {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl MetricKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

impl From<&str> for MetricKey {
    fn from(name: &str) -> Self {
        MetricKey::new(name)
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.labels.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (index, (key, value)) in self.labels.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}=\"{}\"", key, value)?;
        }
        f.write_str("}")
    }
}

/// Monotonically non-decreasing counter
#[derive(Debug, Clone)]
pub struct Counter {
    key: Arc<MetricKey>,
    value: Arc<Mutex<f64>>,
}

impl Counter {
    pub fn new(key: impl Into<MetricKey>) -> Self {
        Self {
            key: Arc::new(key.into()),
            value: Arc::new(Mutex::new(0.0)),
        }
    }

    pub fn key(&self) -> &MetricKey {
        &self.key
    }

    /// Add one
    pub fn increment(&self) {
        *self.value.lock() += 1.0;
    }

    /// Add `amount`, rejecting negative (or NaN) amounts
    pub fn increment_by(&self, amount: f64) -> Result<()> {
        if amount.is_nan() || amount < 0.0 {
            return Err(MonitoringError::NegativeIncrement {
                name: self.key.to_string(),
                amount,
            });
        }
        *self.value.lock() += amount;
        Ok(())
    }

    pub fn value(&self) -> f64 {
        *self.value.lock()
    }

    pub fn reset(&self) {
        *self.value.lock() = 0.0;
    }
}

/// Value that can move in either direction
#[derive(Debug, Clone)]
pub struct Gauge {
    key: Arc<MetricKey>,
    value: Arc<Mutex<f64>>,
}

impl Gauge {
    pub fn new(key: impl Into<MetricKey>) -> Self {
        Self {
            key: Arc::new(key.into()),
            value: Arc::new(Mutex::new(0.0)),
        }
    }

    pub fn key(&self) -> &MetricKey {
        &self.key
    }

    pub fn set(&self, value: f64) {
        *self.value.lock() = value;
    }

    pub fn increment(&self, amount: f64) {
        *self.value.lock() += amount;
    }

    pub fn decrement(&self, amount: f64) {
        *self.value.lock() -= amount;
    }

    pub fn value(&self) -> f64 {
        *self.value.lock()
    }

    pub fn reset(&self) {
        self.set(0.0);
    }
}

/// Point-in-time view of a histogram
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug)]
struct HistogramState {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    reservoir: Vec<f64>,
}

impl HistogramState {
    fn empty(capacity: usize) -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            reservoir: Vec::with_capacity(capacity.min(DEFAULT_RESERVOIR_SIZE)),
        }
    }
}

/// Picks the `ceil(p * n) - 1` order statistic of an ascending sample
fn order_statistic(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize;
    let index = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[index]
}

/// Distribution of observed values.
///
/// Count, sum, min and max are exact over every observation; quantiles are
/// estimated from a fixed-capacity uniform reservoir (Vitter's algorithm R).
#[derive(Debug, Clone)]
pub struct Histogram {
    key: Arc<MetricKey>,
    capacity: usize,
    state: Arc<Mutex<HistogramState>>,
}

impl Histogram {
    pub fn new(key: impl Into<MetricKey>) -> Self {
        Self::with_capacity(key, DEFAULT_RESERVOIR_SIZE)
    }

    pub fn with_capacity(key: impl Into<MetricKey>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            key: Arc::new(key.into()),
            capacity,
            state: Arc::new(Mutex::new(HistogramState::empty(capacity))),
        }
    }

    pub fn key(&self) -> &MetricKey {
        &self.key
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn observe(&self, value: f64) {
        let mut state = self.state.lock();
        state.count += 1;
        state.sum += value;
        state.min = state.min.min(value);
        state.max = state.max.max(value);

        if state.reservoir.len() < self.capacity {
            state.reservoir.push(value);
        } else {
            let slot = rand::thread_rng().gen_range(0..state.count);
            if let Ok(slot) = usize::try_from(slot) {
                if slot < self.capacity {
                    state.reservoir[slot] = value;
                }
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.state.lock().count
    }

    pub fn sum(&self) -> f64 {
        self.state.lock().sum
    }

    pub fn min(&self) -> Option<f64> {
        let state = self.state.lock();
        (state.count > 0).then_some(state.min)
    }

    pub fn max(&self) -> Option<f64> {
        let state = self.state.lock();
        (state.count > 0).then_some(state.max)
    }

    /// Samples currently retained for quantile estimation
    pub fn reservoir_len(&self) -> usize {
        self.state.lock().reservoir.len()
    }

    fn sorted_sample(&self) -> Vec<f64> {
        let mut sample = self.state.lock().reservoir.clone();
        sample.sort_by(|a, b| a.total_cmp(b));
        sample
    }

    /// Estimated quantile for `p` in `[0, 1]`; `None` before any observation
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let sample = self.sorted_sample();
        (!sample.is_empty()).then(|| order_statistic(&sample, p))
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let (count, sum, min, max, mut sample) = {
            let state = self.state.lock();
            (
                state.count,
                state.sum,
                state.min,
                state.max,
                state.reservoir.clone(),
            )
        };
        if count == 0 {
            return HistogramSnapshot::default();
        }
        sample.sort_by(|a, b| a.total_cmp(b));
        HistogramSnapshot {
            count,
            sum,
            min,
            max,
            mean: sum / count as f64,
            p50: order_statistic(&sample, 0.50),
            p90: order_statistic(&sample, 0.90),
            p95: order_statistic(&sample, 0.95),
            p99: order_statistic(&sample, 0.99),
        }
    }

    pub fn reset(&self) {
        *self.state.lock() = HistogramState::empty(self.capacity);
    }
}

/// Histogram of elapsed times in milliseconds
#[derive(Debug, Clone)]
pub struct Timer {
    histogram: Histogram,
}

impl Timer {
    pub fn new(key: impl Into<MetricKey>) -> Self {
        Self::with_capacity(key, DEFAULT_RESERVOIR_SIZE)
    }

    pub fn with_capacity(key: impl Into<MetricKey>, capacity: usize) -> Self {
        Self {
            histogram: Histogram::with_capacity(key, capacity),
        }
    }

    pub fn key(&self) -> &MetricKey {
        self.histogram.key()
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    pub fn record(&self, elapsed: Duration) {
        self.histogram.observe(elapsed.as_secs_f64() * 1000.0);
    }

    /// Begin an observation that is recorded by [`TimerObservation::end`]
    pub fn start(&self) -> TimerObservation {
        TimerObservation {
            timer: self.clone(),
            started: Instant::now(),
            stopped: false,
        }
    }

    /// Guard that records the elapsed time when dropped
    pub fn guard(&self) -> TimerGuard {
        TimerGuard {
            timer: self.clone(),
            started: Instant::now(),
        }
    }

    /// Time a future. The elapsed time is recorded exactly once, however the
    /// future completes.
    pub async fn time<F, T>(&self, operation: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.guard();
        operation.await
    }

    /// Time a closure, recording even if it panics
    pub fn time_sync<F, T>(&self, operation: F) -> T
    where
        F: FnOnce() -> T,
    {
        let _guard = self.guard();
        operation()
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        self.histogram.snapshot()
    }

    pub fn reset(&self) {
        self.histogram.reset();
    }
}

/// One in-flight timing started by [`Timer::start`]
#[derive(Debug)]
pub struct TimerObservation {
    timer: Timer,
    started: Instant,
    stopped: bool,
}

impl TimerObservation {
    /// Record the elapsed time. Fails if the observation already ended or
    /// was cancelled.
    pub fn end(&mut self) -> Result<Duration> {
        if self.stopped {
            return Err(MonitoringError::TimerAlreadyStopped {
                name: self.timer.key().to_string(),
            });
        }
        self.stopped = true;
        let elapsed = self.started.elapsed();
        self.timer.record(elapsed);
        Ok(elapsed)
    }

    /// Discard the observation without recording
    pub fn cancel(&mut self) {
        self.stopped = true;
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

/// Records into its timer on drop
#[derive(Debug)]
pub struct TimerGuard {
    timer: Timer,
    started: Instant,
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.timer.record(self.started.elapsed());
    }
}
