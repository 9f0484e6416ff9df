use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::collections::BTreeMap;
use std::io::{BufRead, Read, Write};
use std::path::PathBuf;

/// Summary of a run
///
/// This is the machine-readable end-of-run document. Every field is computed once from the final
/// metrics snapshot so the document can be rendered, stored and compared without access to the
/// run that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// The unique run id
    ///
    /// Chosen by the runner. Unique for each run.
    pub run_id: String,
    /// The name of the scenario that was run
    pub scenario_name: String,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// The ramp profile that the run was configured with
    pub stages: Vec<StageSummary>,
    /// The total duration of the ramp profile, in milliseconds
    pub planned_duration_ms: u64,
    /// The measured wall time of the run, from the first scheduler tick until the final snapshot,
    /// in milliseconds
    ///
    /// This includes the draining period where virtual users finish their last iteration.
    pub wall_time_ms: u64,
    /// How the run ended
    pub outcome: RunOutcome,
    /// Virtual user counts
    pub vus: VuSummary,
    /// Total number of steps executed by all virtual users
    pub ops_total: u64,
    /// Steps per second over the run wall time
    pub throughput: f64,
    /// Total number of completed iterations
    pub iterations: u64,
    /// All counter metrics, keyed by metric name
    pub counters: BTreeMap<String, CounterSummary>,
    /// All rate metrics, keyed by metric name
    pub rates: BTreeMap<String, RateSummary>,
    /// All trend metrics, keyed by metric name
    pub trends: BTreeMap<String, TrendSummary>,
    /// Threshold verdicts, in the order the thresholds were defined
    pub thresholds: Vec<ThresholdVerdict>,
    /// Trend metrics that exceeded their sample limit and switched to approximate percentiles
    pub degraded_metrics: Vec<String>,
    /// The version of Gale that was used for this run
    pub gale_version: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StageSummary {
    pub duration_ms: u64,
    pub target: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The run completed and every threshold passed
    Passed,
    /// The run completed but at least one threshold failed or had no data
    ThresholdsFailed,
    /// The run was stopped early because a threshold was breached during the run
    AbortedByThreshold,
    /// The run was stopped early by an external signal
    Interrupted,
}

impl RunOutcome {
    /// The process exit code for this outcome.
    ///
    /// Configuration errors never produce a summary, they exit with [CONFIG_ERROR_EXIT_CODE].
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Passed => 0,
            RunOutcome::ThresholdsFailed => 99,
            RunOutcome::Interrupted => 105,
            RunOutcome::AbortedByThreshold => 108,
        }
    }
}

/// Exit code used when the run could not start because its configuration is invalid.
pub const CONFIG_ERROR_EXIT_CODE: i32 = 104;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VuSummary {
    pub initial: usize,
    pub peak: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CounterSummary {
    pub count: u64,
    /// Count per second of run wall time
    pub rate: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RateSummary {
    /// Fraction of samples that were true, between 0 and 1
    pub rate: f64,
    pub passes: u64,
    pub fails: u64,
}

/// Distribution statistics for a trend metric. Durations are in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrendSummary {
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub med: f64,
    #[serde(rename = "p(90)")]
    pub p90: f64,
    #[serde(rename = "p(95)")]
    pub p95: f64,
    #[serde(rename = "p(99)")]
    pub p99: f64,
    /// Set when the percentiles were computed from the bounded histogram instead of every sample
    pub approximate: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdStatus {
    Pass,
    Fail,
    /// The metric was never recorded. This counts as a failure.
    NoData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdVerdict {
    /// The metric the threshold applies to
    pub metric: String,
    /// The threshold expression as written, for example `p(95)<500`
    pub expression: String,
    pub status: ThresholdStatus,
    /// The aggregated value the expression was checked against, if there was one
    pub observed: Option<f64>,
    /// Why the threshold did not pass
    pub reason: Option<String>,
}

impl ThresholdVerdict {
    pub fn passed(&self) -> bool {
        self.status == ThresholdStatus::Pass
    }
}

impl RunSummary {
    /// True if every threshold passed. A run with no thresholds passes.
    pub fn thresholds_passed(&self) -> bool {
        self.thresholds.iter().all(ThresholdVerdict::passed)
    }

    /// Compute a fingerprint for this run summary
    ///
    /// The fingerprint is intended to uniquely identify the configuration used to run the scenario
    /// so that results from runs with the same configuration can be compared. It uses the
    ///     - Scenario name
    ///     - Ramp profile
    ///     - Initial virtual users
    ///     - Threshold expressions
    ///     - Gale version
    ///
    /// The fingerprint is computed using [sha3::Sha3_256].
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.scenario_name.as_bytes());
        for stage in &self.stages {
            Digest::update(&mut hasher, stage.duration_ms.to_le_bytes());
            Digest::update(&mut hasher, (stage.target as u64).to_le_bytes());
        }
        Digest::update(&mut hasher, (self.vus.initial as u64).to_le_bytes());
        self.thresholds
            .iter()
            .sorted_by_key(|t| (t.metric.as_str(), t.expression.as_str()))
            .for_each(|t| {
                Digest::update(&mut hasher, t.metric.as_bytes());
                Digest::update(&mut hasher, t.expression.as_bytes());
            });
        Digest::update(&mut hasher, self.gale_version.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Append the run summary to a file
///
/// The summary will be serialized to JSON and output as a single line followed by a newline. The
/// recommended file extension is `.jsonl`.
pub fn append_run_summary(run_summary: &RunSummary, path: PathBuf) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    store_run_summary(run_summary, &mut file)?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Write the run summary to a file as a pretty printed JSON document, replacing any existing file
///
/// Missing parent directories are created.
pub fn write_run_summary(run_summary: &RunSummary, path: PathBuf) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, run_summary)?;
    Ok(())
}

/// Serialize the run summary to a writer
pub fn store_run_summary<W: Write>(run_summary: &RunSummary, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer(writer, run_summary)?;
    Ok(())
}

/// Load a run summary from a reader
pub fn load_run_summary<R: Read>(reader: R) -> anyhow::Result<RunSummary> {
    let reader = std::io::BufReader::new(reader);
    let run_summary: RunSummary = serde_json::from_reader(reader)?;
    Ok(run_summary)
}

/// Load run summaries from a file
///
/// The file should contain one JSON object per line. This is the format produced by
/// [append_run_summary].
pub fn load_summary_runs(path: PathBuf) -> anyhow::Result<Vec<RunSummary>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut runs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let run: RunSummary = serde_json::from_str(&line)?;
        runs.push(run);
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_summary() -> RunSummary {
        RunSummary {
            run_id: "run-1".to_string(),
            scenario_name: "basic_load".to_string(),
            started_at: 1_700_000_000,
            stages: vec![
                StageSummary {
                    duration_ms: 30_000,
                    target: 20,
                },
                StageSummary {
                    duration_ms: 30_000,
                    target: 0,
                },
            ],
            planned_duration_ms: 60_000,
            wall_time_ms: 61_200,
            outcome: RunOutcome::Passed,
            vus: VuSummary {
                initial: 0,
                peak: 20,
            },
            ops_total: 1200,
            throughput: 19.5,
            iterations: 300,
            counters: BTreeMap::from([(
                "ops_total".to_string(),
                CounterSummary {
                    count: 1200,
                    rate: 19.5,
                },
            )]),
            rates: BTreeMap::from([(
                "ops_failed".to_string(),
                RateSummary {
                    rate: 0.25,
                    passes: 300,
                    fails: 900,
                },
            )]),
            trends: BTreeMap::from([(
                "op_duration".to_string(),
                TrendSummary {
                    count: 1200,
                    avg: 12.5,
                    min: 1.0,
                    max: 210.0,
                    med: 10.0,
                    p90: 30.0,
                    p95: 45.0,
                    p99: 180.0,
                    approximate: false,
                },
            )]),
            thresholds: vec![ThresholdVerdict {
                metric: "op_duration".to_string(),
                expression: "p(95)<500".to_string(),
                status: ThresholdStatus::Pass,
                observed: Some(45.0),
                reason: None,
            }],
            degraded_metrics: vec![],
            gale_version: "0.1.0".to_string(),
        }
    }

    #[test]
    fn trend_percentiles_use_bracket_names() {
        let value = serde_json::to_value(sample_summary()).unwrap();
        let trend = &value["trends"]["op_duration"];

        assert_eq!(trend["p(95)"], serde_json::json!(45.0));
        assert_eq!(trend["med"], serde_json::json!(10.0));
        assert_eq!(value["outcome"], serde_json::json!("passed"));
    }

    #[test]
    fn fingerprint_ignores_results_but_not_configuration() {
        let summary = sample_summary();

        let mut other_results = summary.clone();
        other_results.run_id = "run-2".to_string();
        other_results.ops_total = 5;
        other_results.thresholds[0].status = ThresholdStatus::Fail;
        assert_eq!(summary.fingerprint(), other_results.fingerprint());

        let mut other_profile = summary.clone();
        other_profile.stages[0].target = 21;
        assert_ne!(summary.fingerprint(), other_profile.fingerprint());
    }

    #[test]
    fn no_data_fails_the_run() {
        let mut summary = sample_summary();
        assert!(summary.thresholds_passed());

        summary.thresholds[0].status = ThresholdStatus::NoData;
        assert!(!summary.thresholds_passed());
    }

    #[test]
    fn exit_codes_distinguish_outcomes() {
        assert_eq!(0, RunOutcome::Passed.exit_code());
        assert_eq!(99, RunOutcome::ThresholdsFailed.exit_code());
        assert_ne!(
            RunOutcome::ThresholdsFailed.exit_code(),
            RunOutcome::AbortedByThreshold.exit_code()
        );
        assert_ne!(CONFIG_ERROR_EXIT_CODE, RunOutcome::Interrupted.exit_code());
    }

    #[test]
    fn append_and_load_run_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");

        let first = sample_summary();
        let mut second = sample_summary();
        second.run_id = "run-2".to_string();

        append_run_summary(&first, path.clone()).unwrap();
        append_run_summary(&second, path.clone()).unwrap();

        let runs = load_summary_runs(path).unwrap();
        assert_eq!(vec![first, second], runs);
    }

    #[test]
    fn write_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results").join("summary.json");

        write_run_summary(&sample_summary(), path.clone()).unwrap();

        let loaded = load_run_summary(std::fs::File::open(path).unwrap()).unwrap();
        assert_eq!(sample_summary(), loaded);
    }
}
