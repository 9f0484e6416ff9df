mod metrics;
mod registry;
mod snapshot;
mod threshold;
mod trend;

pub mod report;

use std::time::{Duration, Instant};

pub mod prelude {
    pub use crate::metrics::{MetricHandle, MetricKind, RecordError};
    pub use crate::registry::{MetricsRegistry, DEFAULT_TREND_SAMPLE_LIMIT};
    pub use crate::snapshot::{MetricSnapshot, MetricsSnapshot, RateSnapshot, TrendSnapshot};
    pub use crate::threshold::{
        evaluate_thresholds, Aggregation, Comparison, Threshold, ThresholdExpression,
        ThresholdParseError,
    };
    pub use crate::report::{build_run_summary, render_json, render_text, ReportConfig, RunMeta};
    pub use crate::OperationRecord;
}

/// Timing for a single operation, usually one step executed by a virtual user.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub operation_id: String,
    started: Instant,
    pub elapsed: Option<Duration>,
    pub is_error: bool,
}

impl OperationRecord {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            started: Instant::now(),
            elapsed: None,
            is_error: false,
        }
    }

    /// Stop the clock on this operation. Calling this more than once keeps the first timing.
    pub fn finish(&mut self, is_error: bool) {
        if self.elapsed.is_none() {
            self.elapsed = Some(self.started.elapsed());
        }
        self.is_error = is_error;
    }

    /// Replace the measured time, for when the operation reports a more precise timing itself.
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    /// The measured duration, or the time since the operation started if it has not finished.
    pub fn duration(&self) -> Duration {
        self.elapsed.unwrap_or_else(|| self.started.elapsed())
    }
}

/// Milliseconds as a float, the unit used by every duration trend.
pub fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
