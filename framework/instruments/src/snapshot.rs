use std::collections::BTreeMap;

use crate::metrics::MetricKind;
use crate::trend::{nearest_rank, Distribution, TrendStore};

/// Point-in-time copy of every metric in a registry, keyed by name.
///
/// Snapshots are plain data. Threshold evaluation and reporting work from a snapshot and never
/// look at live state.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    metrics: BTreeMap<String, MetricSnapshot>,
}

#[derive(Debug, Clone)]
pub enum MetricSnapshot {
    Counter(u64),
    Rate(RateSnapshot),
    Trend(TrendSnapshot),
}

impl MetricSnapshot {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricSnapshot::Counter(_) => MetricKind::Counter,
            MetricSnapshot::Rate(_) => MetricKind::Rate,
            MetricSnapshot::Trend(_) => MetricKind::Trend,
        }
    }

    /// Number of samples, or the counter total for a counter.
    pub fn count(&self) -> u64 {
        match self {
            MetricSnapshot::Counter(count) => *count,
            MetricSnapshot::Rate(rate) => rate.total,
            MetricSnapshot::Trend(trend) => trend.count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSnapshot {
    pub passes: u64,
    pub total: u64,
}

impl RateSnapshot {
    /// Fraction of true samples. Zero when there are no samples.
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passes as f64 / self.total as f64
        }
    }

    pub fn fails(&self) -> u64 {
        self.total - self.passes
    }
}

#[derive(Debug, Clone)]
pub struct TrendSnapshot {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    distribution: Distribution,
}

impl TrendSnapshot {
    /// Copy the store's statistics and samples. Cheap enough to run under the metric's lock.
    pub(crate) fn capture(store: &TrendStore) -> Self {
        Self {
            count: store.count(),
            sum: store.sum(),
            min: store.min(),
            max: store.max(),
            distribution: store.distribution(),
        }
    }

    /// Finish a captured snapshot by sorting its samples. Runs without holding any lock.
    pub(crate) fn sorted(self) -> Self {
        Self {
            distribution: self.distribution.sorted(),
            ..self
        }
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Nearest-rank percentile: the value at position `ceil(p / 100 * n)` of the sorted samples.
    ///
    /// When the trend has degraded to approximate mode the value is read from the histogram at that
    /// rank and clamped to the exact min and max.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }

        match &self.distribution {
            Distribution::Exact(sorted) => {
                let rank = nearest_rank(p, sorted.len() as u64);
                sorted[(rank - 1) as usize]
            }
            Distribution::Approximate(approximate) => approximate
                .value_at_rank(nearest_rank(p, self.count))
                .clamp(self.min, self.max),
        }
    }

    pub fn med(&self) -> f64 {
        self.percentile(50.0)
    }

    pub fn is_approximate(&self) -> bool {
        matches!(self.distribution, Distribution::Approximate(_))
    }
}

impl MetricsSnapshot {
    pub(crate) fn new(metrics: BTreeMap<String, MetricSnapshot>) -> Self {
        Self { metrics }
    }

    pub fn get(&self, name: &str) -> Option<&MetricSnapshot> {
        self.metrics.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetricSnapshot)> {
        self.metrics.iter()
    }

    pub fn counter(&self, name: &str) -> Option<u64> {
        match self.metrics.get(name) {
            Some(MetricSnapshot::Counter(count)) => Some(*count),
            _ => None,
        }
    }

    pub fn rate(&self, name: &str) -> Option<&RateSnapshot> {
        match self.metrics.get(name) {
            Some(MetricSnapshot::Rate(rate)) => Some(rate),
            _ => None,
        }
    }

    pub fn trend(&self, name: &str) -> Option<&TrendSnapshot> {
        match self.metrics.get(name) {
            Some(MetricSnapshot::Trend(trend)) => Some(trend),
            _ => None,
        }
    }

    /// Names of trend metrics that are reporting approximate percentiles.
    pub fn degraded_metrics(&self) -> Vec<String> {
        self.metrics
            .iter()
            .filter_map(|(name, metric)| match metric {
                MetricSnapshot::Trend(trend) if trend.is_approximate() => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
