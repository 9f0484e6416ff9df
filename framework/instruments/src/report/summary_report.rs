mod tables;

use std::fmt::Write;

use gale_summary_model::{RunOutcome, RunSummary, ThresholdStatus};
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::report::summary_report::tables::{CounterRow, RateRow, ThresholdRow, TrendRow};

/// The human-readable form of the summary.
///
/// Everything shown here is read from the [RunSummary], so the text and JSON forms of a run
/// always agree.
pub fn render_text(summary: &RunSummary) -> String {
    let mut out = String::new();

    // Writing to a String cannot fail.
    let _ = writeln!(
        out,
        "\nSummary of run `{}` ({})",
        summary.scenario_name, summary.run_id
    );
    let _ = writeln!(out, "Outcome: {}", outcome_label(summary.outcome));
    let _ = writeln!(
        out,
        "Wall time: {:.2}s (planned {:.2}s)",
        summary.wall_time_ms as f64 / 1000.0,
        summary.planned_duration_ms as f64 / 1000.0
    );
    let _ = writeln!(
        out,
        "Virtual users: peak {}, initial {}",
        summary.vus.peak, summary.vus.initial
    );
    let _ = writeln!(
        out,
        "Operations: {} total, {:.2}/s, {} iterations",
        summary.ops_total, summary.throughput, summary.iterations
    );

    let trends = summary
        .trends
        .iter()
        .map(|(name, trend)| TrendRow {
            name: if trend.approximate {
                format!("{name} (approx.)")
            } else {
                name.clone()
            },
            avg: trend.avg,
            min: trend.min,
            med: trend.med,
            max: trend.max,
            p90: trend.p90,
            p95: trend.p95,
            p99: trend.p99,
            count: trend.count,
        })
        .collect::<Vec<_>>();
    write_table(&mut out, "Trends", &trends);

    let rates = summary
        .rates
        .iter()
        .map(|(name, rate)| RateRow {
            name: name.clone(),
            rate: rate.rate,
            passes: rate.passes,
            fails: rate.fails,
        })
        .collect::<Vec<_>>();
    write_table(&mut out, "Rates", &rates);

    let counters = summary
        .counters
        .iter()
        .map(|(name, counter)| CounterRow {
            name: name.clone(),
            count: counter.count,
            rate: counter.rate,
        })
        .collect::<Vec<_>>();
    write_table(&mut out, "Counters", &counters);

    let thresholds = summary
        .thresholds
        .iter()
        .map(|verdict| ThresholdRow {
            metric: verdict.metric.clone(),
            expression: verdict.expression.clone(),
            status: match verdict.status {
                ThresholdStatus::Pass => "pass",
                ThresholdStatus::Fail => "FAIL",
                ThresholdStatus::NoData => "NO DATA",
            }
            .to_string(),
            observed: verdict
                .observed
                .map(|v| format!("{v:.4}"))
                .unwrap_or_else(|| "-".to_string()),
            reason: verdict.reason.clone().unwrap_or_default(),
        })
        .collect::<Vec<_>>();
    write_table(&mut out, "Thresholds", &thresholds);

    if !summary.degraded_metrics.is_empty() {
        let _ = writeln!(
            out,
            "\nPercentiles are approximate for: {}",
            summary.degraded_metrics.join(", ")
        );
    }

    out
}

fn write_table<T: Tabled>(out: &mut String, title: &str, rows: &[T]) {
    if rows.is_empty() {
        return;
    }

    let mut table = Table::new(rows);
    table.with(Style::modern());

    let _ = writeln!(out, "\n{title}");
    let _ = writeln!(out, "{table}");
}

fn outcome_label(outcome: RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Passed => "passed",
        RunOutcome::ThresholdsFailed => "thresholds failed",
        RunOutcome::AbortedByThreshold => "aborted, threshold breached",
        RunOutcome::Interrupted => "interrupted",
    }
}
