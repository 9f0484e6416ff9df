use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::metrics::{validate, Accumulator, Metric, MetricHandle, MetricKind, RecordError};
use crate::snapshot::{MetricSnapshot, MetricsSnapshot, RateSnapshot, TrendSnapshot};

/// Default number of samples a trend metric keeps before switching to approximate percentiles.
pub const DEFAULT_TREND_SAMPLE_LIMIT: usize = 1_000_000;

/// Thread-safe store of every metric recorded during a run.
///
/// The registry is keyed by metric name. The index lock is only held to find or register a metric;
/// samples are applied to the metric's own accumulator after the index lock has been released, so
/// recording into one metric never blocks recording into another. Counters are atomic, rates and
/// trends have a lock each.
///
/// The registry is an ordinary value that is shared with `Arc`. There is no process-wide instance.
#[derive(Debug)]
pub struct MetricsRegistry {
    metrics: RwLock<HashMap<String, Arc<Metric>>>,
    trend_sample_limit: usize,
    sealed: Arc<AtomicBool>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_trend_sample_limit(DEFAULT_TREND_SAMPLE_LIMIT)
    }

    /// Create a registry whose trend metrics switch to approximate percentiles once they hold
    /// more than `limit` samples.
    pub fn with_trend_sample_limit(limit: usize) -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
            trend_sample_limit: limit,
            sealed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Record one sample for the named metric, registering it with `kind` if it is new.
    ///
    /// For rate metrics any non-zero value counts as true. Counter values must be non-negative.
    /// Once the registry has been sealed, samples are validated and then dropped.
    pub fn record(&self, name: &str, kind: MetricKind, value: f64) -> Result<(), RecordError> {
        validate(name, kind, value)?;
        self.handle(name, kind)?.record(value)
    }

    pub fn add_counter(&self, name: &str, count: u64) -> Result<(), RecordError> {
        self.record(name, MetricKind::Counter, count as f64)
    }

    pub fn add_rate(&self, name: &str, value: bool) -> Result<(), RecordError> {
        self.record(name, MetricKind::Rate, if value { 1.0 } else { 0.0 })
    }

    pub fn add_trend(&self, name: &str, value: f64) -> Result<(), RecordError> {
        self.record(name, MetricKind::Trend, value)
    }

    /// Resolve a handle to the named metric, registering it with `kind` if it is new.
    pub fn handle(&self, name: &str, kind: MetricKind) -> Result<MetricHandle, RecordError> {
        let existing = self.metrics.read().get(name).cloned();

        let metric = match existing {
            Some(metric) => metric,
            None => self
                .metrics
                .write()
                .entry(name.to_string())
                .or_insert_with(|| {
                    log::debug!("Registered {kind} metric `{name}`");
                    Arc::new(Metric::new(name.to_string(), kind, self.trend_sample_limit))
                })
                .clone(),
        };

        let registered = metric.accumulator.kind();
        if registered != kind {
            return Err(RecordError::KindMismatch {
                name: name.to_string(),
                registered,
                requested: kind,
            });
        }

        Ok(MetricHandle {
            metric,
            sealed: self.sealed.clone(),
        })
    }

    /// The kind a metric was registered with, if it has been recorded.
    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.metrics
            .read()
            .get(name)
            .map(|metric| metric.accumulator.kind())
    }

    /// Stop accepting samples. Used once the final snapshot has been taken so that work which is
    /// abandoned after the grace period does not leak into the results.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Point-in-time view of every metric.
    ///
    /// Each metric is read under its own lock so a snapshot never sees half of a sample. Different
    /// metrics are read one after the other and are not mutually consistent.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let metrics: Vec<Arc<Metric>> = self.metrics.read().values().cloned().collect();

        let metrics = metrics
            .into_iter()
            .map(|metric| {
                let snapshot = match &metric.accumulator {
                    Accumulator::Counter(count) => {
                        MetricSnapshot::Counter(count.load(Ordering::Relaxed))
                    }
                    Accumulator::Rate(state) => {
                        let state = state.lock();
                        MetricSnapshot::Rate(RateSnapshot {
                            passes: state.passes,
                            total: state.total,
                        })
                    }
                    Accumulator::Trend(store) => {
                        let captured = TrendSnapshot::capture(&store.lock());
                        MetricSnapshot::Trend(captured.sorted())
                    }
                };
                (metric.name.clone(), snapshot)
            })
            .collect::<BTreeMap<_, _>>();

        MetricsSnapshot::new(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn kind_is_fixed_at_first_registration() {
        let registry = MetricsRegistry::new();
        registry.add_counter("ops_total", 1).unwrap();

        let err = registry.add_rate("ops_total", true).unwrap_err();
        assert_eq!(
            RecordError::KindMismatch {
                name: "ops_total".to_string(),
                registered: MetricKind::Counter,
                requested: MetricKind::Rate,
            },
            err
        );
        assert_eq!(Some(MetricKind::Counter), registry.kind_of("ops_total"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let registry = MetricsRegistry::new();

        assert!(registry.record("c", MetricKind::Counter, -1.0).is_err());
        assert!(registry.record("t", MetricKind::Trend, f64::NAN).is_err());
        assert!(registry.record("r", MetricKind::Rate, f64::INFINITY).is_err());
    }

    #[test]
    fn rate_is_exact_fraction_of_true_samples() {
        let registry = MetricsRegistry::new();
        for i in 0..40 {
            registry.add_rate("checks", i % 4 == 0).unwrap();
        }

        let snapshot = registry.snapshot();
        let rate = snapshot.rate("checks").unwrap();
        assert_eq!(10, rate.passes);
        assert_eq!(40, rate.total);
        assert_eq!(10.0 / 40.0, rate.rate());
    }

    #[test]
    fn percentile_of_ten_to_one_thousand() {
        let registry = MetricsRegistry::new();
        // Record out of order to show that ranks come from sorted order.
        for v in (1..=100).rev() {
            registry.add_trend("http_req_duration", (v * 10) as f64).unwrap();
        }

        let snapshot = registry.snapshot();
        let trend = snapshot.trend("http_req_duration").unwrap();
        assert_eq!(950.0, trend.percentile(95.0));
        assert_eq!(990.0, trend.percentile(99.0));
        assert_eq!(500.0, trend.med());
        assert_eq!(10.0, trend.min);
        assert_eq!(1000.0, trend.max);
        assert_eq!(505.0, trend.avg());
        assert!(!trend.is_approximate());
    }

    #[test]
    fn trend_degrades_past_sample_limit() {
        let registry = MetricsRegistry::with_trend_sample_limit(10);
        for v in 1..=100 {
            registry.add_trend("op_duration", v as f64).unwrap();
        }

        let snapshot = registry.snapshot();
        let trend = snapshot.trend("op_duration").unwrap();
        assert!(trend.is_approximate());
        assert_eq!(100, trend.count);
        assert_eq!(1.0, trend.min);
        assert_eq!(100.0, trend.max);
        assert!((trend.percentile(95.0) - 95.0).abs() <= 1.0);
        assert_eq!(vec!["op_duration".to_string()], snapshot.degraded_metrics());
    }

    #[test]
    fn sealed_registry_drops_samples() {
        let registry = MetricsRegistry::new();
        let handle = registry.handle("ops_total", MetricKind::Counter).unwrap();
        handle.add(1).unwrap();

        registry.seal();
        handle.add(1).unwrap();
        registry.add_counter("ops_total", 1).unwrap();

        assert_eq!(Some(1), registry.snapshot().counter("ops_total"));
    }

    #[test]
    fn concurrent_counter_updates_are_not_lost() {
        let registry = Arc::new(MetricsRegistry::new());

        let handles = (0..16)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        registry.add_counter("ops_total", 1).unwrap();
                        registry.add_rate("ops_failed", i % 10 == 0).unwrap();
                        registry
                            .add_trend(&format!("step_{}", t % 4), i as f64)
                            .unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = registry.snapshot();
        assert_eq!(Some(16_000), snapshot.counter("ops_total"));
        let failed = snapshot.rate("ops_failed").unwrap();
        assert_eq!(16_000, failed.total);
        assert_eq!(1_600, failed.passes);
        let trend_total: u64 = (0..4)
            .map(|t| snapshot.trend(&format!("step_{t}")).unwrap().count)
            .sum();
        assert_eq!(16_000, trend_total);
    }

    #[test]
    fn trend_capture_copies_samples_unsorted() {
        let mut store = crate::trend::TrendStore::new(10);
        for v in [3.0, 1.0, 2.0] {
            store.push(v);
        }

        let captured = TrendSnapshot::capture(&store);
        assert_eq!(3.0, captured.percentile(1.0));

        let sorted = captured.sorted();
        assert_eq!(1.0, sorted.percentile(1.0));
        assert_eq!(3.0, sorted.percentile(100.0));
    }

    #[test]
    fn trend_writers_progress_while_snapshots_are_taken() {
        let registry = Arc::new(MetricsRegistry::new());
        for v in 0..100_000 {
            registry.add_trend("http_req_duration", v as f64).unwrap();
        }

        let reader = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for _ in 0..5 {
                    let snapshot = registry.snapshot();
                    let trend = snapshot.trend("http_req_duration").unwrap();
                    assert!(trend.count >= 100_000);
                    assert!(trend.percentile(50.0) <= trend.percentile(95.0));
                }
            })
        };

        for v in 0..1000 {
            registry.add_trend("http_req_duration", v as f64).unwrap();
        }
        reader.join().unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(101_000, snapshot.trend("http_req_duration").unwrap().count);
    }
}
