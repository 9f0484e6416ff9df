mod summary_report;

use std::path::PathBuf;
use std::time::Duration;

use gale_summary_model::{
    append_run_summary, write_run_summary, CounterSummary, RateSummary, RunOutcome, RunSummary,
    StageSummary, ThresholdVerdict, TrendSummary, VuSummary,
};

use crate::snapshot::{MetricSnapshot, MetricsSnapshot};

pub use summary_report::render_text;

/// Facts about a run that do not come from the metrics registry.
#[derive(Debug, Clone)]
pub struct RunMeta {
    pub run_id: String,
    pub scenario_name: String,
    /// Unix timestamp in seconds
    pub started_at: i64,
    pub stages: Vec<StageSummary>,
    /// From the first scheduler tick until the final snapshot was taken
    pub wall_time: Duration,
    pub vus_initial: usize,
    pub peak_vus: usize,
    /// Set when the run did not reach the end of its ramp profile
    pub stopped_early: Option<RunOutcome>,
}

/// Build the end-of-run document from the final snapshot and threshold verdicts.
///
/// This is a pure function of its inputs. Rendering, storing and comparing runs all start from
/// the [RunSummary] it returns.
pub fn build_run_summary(
    meta: &RunMeta,
    snapshot: &MetricsSnapshot,
    thresholds: Vec<ThresholdVerdict>,
) -> RunSummary {
    let wall_secs = meta.wall_time.as_secs_f64();
    let per_second = |count: u64| {
        if wall_secs > 0.0 {
            count as f64 / wall_secs
        } else {
            0.0
        }
    };

    let mut counters = std::collections::BTreeMap::new();
    let mut rates = std::collections::BTreeMap::new();
    let mut trends = std::collections::BTreeMap::new();

    for (name, metric) in snapshot.iter() {
        match metric {
            MetricSnapshot::Counter(count) => {
                counters.insert(
                    name.clone(),
                    CounterSummary {
                        count: *count,
                        rate: per_second(*count),
                    },
                );
            }
            MetricSnapshot::Rate(rate) if rate.total > 0 => {
                rates.insert(
                    name.clone(),
                    RateSummary {
                        rate: rate.rate(),
                        passes: rate.passes,
                        fails: rate.fails(),
                    },
                );
            }
            MetricSnapshot::Trend(trend) if trend.count > 0 => {
                trends.insert(
                    name.clone(),
                    TrendSummary {
                        count: trend.count,
                        avg: trend.avg(),
                        min: trend.min,
                        max: trend.max,
                        med: trend.med(),
                        p90: trend.percentile(90.0),
                        p95: trend.percentile(95.0),
                        p99: trend.percentile(99.0),
                        approximate: trend.is_approximate(),
                    },
                );
            }
            MetricSnapshot::Rate(_) | MetricSnapshot::Trend(_) => {}
        }
    }

    let ops_total = snapshot.counter("ops_total").unwrap_or_default();
    let thresholds_passed = thresholds.iter().all(ThresholdVerdict::passed);

    RunSummary {
        run_id: meta.run_id.clone(),
        scenario_name: meta.scenario_name.clone(),
        started_at: meta.started_at,
        stages: meta.stages.clone(),
        planned_duration_ms: meta.stages.iter().map(|s| s.duration_ms).sum(),
        wall_time_ms: meta.wall_time.as_millis() as u64,
        outcome: meta.stopped_early.unwrap_or(if thresholds_passed {
            RunOutcome::Passed
        } else {
            RunOutcome::ThresholdsFailed
        }),
        vus: VuSummary {
            initial: meta.vus_initial,
            peak: meta.peak_vus,
        },
        ops_total,
        throughput: per_second(ops_total),
        iterations: snapshot.counter("iterations").unwrap_or_default(),
        counters,
        rates,
        trends,
        thresholds,
        degraded_metrics: snapshot.degraded_metrics(),
        gale_version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

/// The machine-readable form of the summary, as a pretty printed JSON document.
pub fn render_json(summary: &RunSummary) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(summary)?)
}

/// Where the end-of-run summary should be written.
///
/// Nothing is enabled by default.
#[derive(Debug, Clone, Default)]
pub struct ReportConfig {
    text_summary: bool,
    json_path: Option<PathBuf>,
    jsonl_path: Option<PathBuf>,
}

impl ReportConfig {
    /// Print the human-readable summary to stdout.
    pub fn enable_text_summary(mut self) -> Self {
        self.text_summary = true;
        self
    }

    /// Write the summary as a JSON document, replacing the file if it exists.
    pub fn enable_json(mut self, path: impl Into<PathBuf>) -> Self {
        self.json_path = Some(path.into());
        self
    }

    /// Append the summary as one line of a JSONL run history.
    pub fn enable_jsonl(mut self, path: impl Into<PathBuf>) -> Self {
        self.jsonl_path = Some(path.into());
        self
    }

    /// Write the summary to every enabled sink.
    pub fn emit(&self, summary: &RunSummary) -> anyhow::Result<()> {
        if self.text_summary {
            println!("{}", render_text(summary));
        }

        if let Some(path) = &self.json_path {
            write_run_summary(summary, path.clone())?;
            log::info!("Wrote run summary to {}", path.display());
        }

        if let Some(path) = &self.jsonl_path {
            append_run_summary(summary, path.clone())?;
            log::info!("Appended run summary to {}", path.display());
        }

        Ok(())
    }
}
