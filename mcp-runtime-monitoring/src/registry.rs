//! Named metric registry with get-or-create semantics

use crate::metrics::{
    Counter, Gauge, Histogram, HistogramSnapshot, MetricKey, Timer, DEFAULT_RESERVOIR_SIZE,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Immutable point-in-time view of a registry, keyed by rendered metric key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub timestamp: DateTime<Utc>,
    pub counters: BTreeMap<String, f64>,
    pub gauges: BTreeMap<String, f64>,
    pub histograms: BTreeMap<String, HistogramSnapshot>,
    pub timers: BTreeMap<String, HistogramSnapshot>,
}

impl RegistrySnapshot {
    pub fn counter(&self, key: &str) -> Option<f64> {
        self.counters.get(key).copied()
    }

    pub fn gauge(&self, key: &str) -> Option<f64> {
        self.gauges.get(key).copied()
    }

    pub fn histogram(&self, key: &str) -> Option<&HistogramSnapshot> {
        self.histograms.get(key)
    }

    pub fn timer(&self, key: &str) -> Option<&HistogramSnapshot> {
        self.timers.get(key)
    }
}

fn get_or_create<T: Clone>(
    map: &Mutex<HashMap<MetricKey, T>>,
    key: MetricKey,
    create: impl FnOnce(MetricKey) -> T,
) -> T {
    map.lock()
        .entry(key)
        .or_insert_with_key(|key| create(key.clone()))
        .clone()
}

fn collect<T, V>(map: &Mutex<HashMap<MetricKey, T>>, value: impl Fn(&T) -> V) -> BTreeMap<String, V> {
    map.lock()
        .iter()
        .map(|(key, metric)| (key.to_string(), value(metric)))
        .collect()
}

/// Registry of metrics. Requesting an existing key returns the same instance.
#[derive(Debug)]
pub struct MetricsRegistry {
    reservoir_size: usize,
    counters: Mutex<HashMap<MetricKey, Counter>>,
    gauges: Mutex<HashMap<MetricKey, Gauge>>,
    histograms: Mutex<HashMap<MetricKey, Histogram>>,
    timers: Mutex<HashMap<MetricKey, Timer>>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_reservoir_size(DEFAULT_RESERVOIR_SIZE)
    }

    pub fn with_reservoir_size(reservoir_size: usize) -> Self {
        Self {
            reservoir_size,
            counters: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
        }
    }

    pub fn counter(&self, key: impl Into<MetricKey>) -> Counter {
        get_or_create(&self.counters, key.into(), Counter::new)
    }

    pub fn gauge(&self, key: impl Into<MetricKey>) -> Gauge {
        get_or_create(&self.gauges, key.into(), Gauge::new)
    }

    pub fn histogram(&self, key: impl Into<MetricKey>) -> Histogram {
        let capacity = self.reservoir_size;
        get_or_create(&self.histograms, key.into(), |key| {
            Histogram::with_capacity(key, capacity)
        })
    }

    pub fn timer(&self, key: impl Into<MetricKey>) -> Timer {
        let capacity = self.reservoir_size;
        get_or_create(&self.timers, key.into(), |key| {
            Timer::with_capacity(key, capacity)
        })
    }

    pub fn counters(&self) -> Vec<Counter> {
        self.counters.lock().values().cloned().collect()
    }

    pub fn gauges(&self) -> Vec<Gauge> {
        self.gauges.lock().values().cloned().collect()
    }

    pub fn histograms(&self) -> Vec<Histogram> {
        self.histograms.lock().values().cloned().collect()
    }

    pub fn timers(&self) -> Vec<Timer> {
        self.timers.lock().values().cloned().collect()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            timestamp: Utc::now(),
            counters: collect(&self.counters, Counter::value),
            gauges: collect(&self.gauges, Gauge::value),
            histograms: collect(&self.histograms, Histogram::snapshot),
            timers: collect(&self.timers, Timer::snapshot),
        }
    }

    /// Zero every metric; identities survive
    pub fn reset(&self) {
        self.counters.lock().values().for_each(Counter::reset);
        self.gauges.lock().values().for_each(Gauge::reset);
        self.histograms.lock().values().for_each(Histogram::reset);
        self.timers.lock().values().for_each(Timer::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_key_returns_same_instance() {
        let registry = MetricsRegistry::new();
        registry.counter("hits").increment();
        registry.counter("hits").increment();
        assert_eq!(registry.counter("hits").value(), 2.0);

        let labelled = MetricKey::new("hits").with_label("method", "ping");
        registry.counter(labelled.clone()).increment();
        assert_eq!(registry.counter(labelled).value(), 1.0);
        assert_eq!(registry.counters().len(), 2);
    }

    #[test]
    fn test_snapshot_and_reset() {
        let registry = MetricsRegistry::new();
        let counter = registry.counter("requests");
        for _ in 0..3 {
            counter.increment_by(1.0).unwrap();
        }
        let histogram = registry.histogram("latency");
        for value in [10.0, 20.0, 30.0] {
            histogram.observe(value);
        }
        registry.gauge("active").set(4.0);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.counter("requests"), Some(3.0));
        assert_eq!(snapshot.gauge("active"), Some(4.0));
        let latency = snapshot.histogram("latency").unwrap();
        assert_eq!(latency.count, 3);
        assert_eq!(latency.sum, 60.0);
        assert_eq!(latency.min, 10.0);
        assert_eq!(latency.max, 30.0);
        assert_eq!(latency.mean, 20.0);

        registry.reset();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.counter("requests"), Some(0.0));
        assert_eq!(snapshot.histogram("latency").unwrap().count, 0);
        assert_eq!(counter.value(), 0.0);
    }

    #[test]
    fn test_snapshot_keys_render_labels() {
        let registry = MetricsRegistry::with_reservoir_size(8);
        registry
            .timer(MetricKey::new("request_duration_ms").with_label("method", "ping"))
            .record(std::time::Duration::from_millis(3));

        let snapshot = registry.snapshot();
        let timer = snapshot
            .timer("request_duration_ms{method=\"ping\"}")
            .unwrap();
        assert_eq!(timer.count, 1);
        assert_eq!(registry.timers()[0].histogram().capacity(), 8);
    }
}
