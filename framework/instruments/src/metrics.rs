use parking_lot::Mutex;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::trend::TrendStore;

/// The kind of a metric is fixed when it is first recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Monotonic sum, such as the total number of requests.
    Counter,
    /// Fraction of boolean samples that are true.
    Rate,
    /// Distribution of numeric samples, supporting percentile queries.
    Trend,
}

impl Display for MetricKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Rate => write!(f, "rate"),
            MetricKind::Trend => write!(f, "trend"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RecordError {
    #[error("metric `{name}` is a {registered} and cannot accept {requested} samples")]
    KindMismatch {
        name: String,
        registered: MetricKind,
        requested: MetricKind,
    },
    #[error("invalid value {value} for {kind} metric `{name}`")]
    InvalidValue {
        name: String,
        kind: MetricKind,
        value: f64,
    },
}

#[derive(Debug)]
pub(crate) struct RateState {
    pub(crate) passes: u64,
    pub(crate) total: u64,
}

/// One accumulator per metric name. Each one is synchronised on its own so that writers to
/// different metrics never contend.
#[derive(Debug)]
pub(crate) enum Accumulator {
    Counter(AtomicU64),
    Rate(Mutex<RateState>),
    Trend(Mutex<TrendStore>),
}

impl Accumulator {
    pub(crate) fn new(kind: MetricKind, trend_sample_limit: usize) -> Self {
        match kind {
            MetricKind::Counter => Accumulator::Counter(AtomicU64::new(0)),
            MetricKind::Rate => Accumulator::Rate(Mutex::new(RateState {
                passes: 0,
                total: 0,
            })),
            MetricKind::Trend => Accumulator::Trend(Mutex::new(TrendStore::new(trend_sample_limit))),
        }
    }

    pub(crate) fn kind(&self) -> MetricKind {
        match self {
            Accumulator::Counter(_) => MetricKind::Counter,
            Accumulator::Rate(_) => MetricKind::Rate,
            Accumulator::Trend(_) => MetricKind::Trend,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Metric {
    pub(crate) name: String,
    pub(crate) accumulator: Accumulator,
}

impl Metric {
    pub(crate) fn new(name: String, kind: MetricKind, trend_sample_limit: usize) -> Self {
        Self {
            name,
            accumulator: Accumulator::new(kind, trend_sample_limit),
        }
    }

    /// Apply one sample. The value has already been validated for this metric's kind.
    pub(crate) fn apply(&self, value: f64) {
        match &self.accumulator {
            Accumulator::Counter(count) => {
                count.fetch_add(value.round() as u64, Ordering::Relaxed);
            }
            Accumulator::Rate(state) => {
                let mut state = state.lock();
                state.total += 1;
                if value != 0.0 {
                    state.passes += 1;
                }
            }
            Accumulator::Trend(store) => {
                if store.lock().push(value) {
                    log::warn!(
                        "Trend metric `{}` exceeded its sample limit, percentiles are now approximate",
                        self.name
                    );
                }
            }
        }
    }
}

pub(crate) fn validate(name: &str, kind: MetricKind, value: f64) -> Result<(), RecordError> {
    let valid = match kind {
        MetricKind::Counter => value.is_finite() && value >= 0.0,
        MetricKind::Rate | MetricKind::Trend => value.is_finite(),
    };

    if valid {
        Ok(())
    } else {
        Err(RecordError::InvalidValue {
            name: name.to_string(),
            kind,
            value,
        })
    }
}

/// A pre-resolved reference to one metric in a [crate::prelude::MetricsRegistry].
///
/// Virtual users resolve the metrics they record on every step once and then write through the
/// handle, which skips the name lookup.
#[derive(Debug, Clone)]
pub struct MetricHandle {
    pub(crate) metric: Arc<Metric>,
    pub(crate) sealed: Arc<AtomicBool>,
}

impl MetricHandle {
    pub fn name(&self) -> &str {
        &self.metric.name
    }

    pub fn kind(&self) -> MetricKind {
        self.metric.accumulator.kind()
    }

    /// Record a raw sample. For a rate metric, any non-zero value counts as true.
    pub fn record(&self, value: f64) -> Result<(), RecordError> {
        validate(&self.metric.name, self.kind(), value)?;
        if self.sealed.load(Ordering::Acquire) {
            log::trace!("Dropping sample for `{}`, registry is sealed", self.metric.name);
            return Ok(());
        }
        self.metric.apply(value);
        Ok(())
    }

    pub fn add(&self, count: u64) -> Result<(), RecordError> {
        self.record(count as f64)
    }

    pub fn add_bool(&self, value: bool) -> Result<(), RecordError> {
        self.record(if value { 1.0 } else { 0.0 })
    }
}
