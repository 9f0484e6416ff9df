use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::{parse_duration, parse_threshold_option, ConfigError};
use crate::stage::Stage;

#[derive(Parser, Debug, Clone, Default)]
#[command(about, long_about = None)]
pub struct GaleScenarioCli {
    /// A connection string for the service to test, such as the base URL of an HTTP API
    #[clap(short, long)]
    pub connection_string: Option<String>,

    /// Replace the scenario's ramp profile. Specify each stage as `DURATION:TARGET`, for example
    /// `--stage=30s:20 --stage=1m:50 --stage=30s:0`.
    ///
    /// Durations accept `ms`, `s`, `m` and `h` units and combinations such as `1m30s`.
    #[clap(long, value_parser = parse_stage)]
    pub stage: Vec<Stage>,

    /// The number of virtual users that the first stage ramps from
    #[clap(long)]
    pub vus: Option<usize>,

    /// How long to wait for virtual users to finish their current iteration once the run is
    /// stopped, before in-flight work is abandoned
    #[clap(long, value_parser = parse_duration_arg)]
    pub graceful_stop: Option<Duration>,

    /// Add a threshold in the format `METRIC:EXPRESSION`, for example
    /// `--threshold=http_req_duration:p(95)<500`.
    ///
    /// You can specify multiple thresholds by using the flag multiple times. They are added to the
    /// thresholds that the scenario defines.
    #[clap(long, value_parser = parse_threshold)]
    pub threshold: Vec<(String, String)>,

    /// Load run settings from a TOML file. Options given on the command line take precedence.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Stop the run as soon as a threshold fails, rather than only checking thresholds at the end
    #[clap(long, default_value = "false")]
    pub abort_on_fail: bool,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,

    /// Write the end-of-run summary as a JSON document to this path
    #[clap(long)]
    pub summary_json: Option<PathBuf>,

    /// Append the end-of-run summary to this JSONL file, one run per line
    #[clap(long)]
    pub summary_jsonl: Option<PathBuf>,

    /// Do not print the end-of-run summary
    #[clap(long, default_value = "false")]
    pub no_summary: bool,

    /// Set the ID of the run. If not set, a random ID is generated.
    #[clap(long)]
    pub run_id: Option<String>,
}

fn parse_stage(s: &str) -> Result<Stage, ConfigError> {
    s.parse()
}

fn parse_duration_arg(s: &str) -> Result<Duration, ConfigError> {
    parse_duration(s)
}

fn parse_threshold(s: &str) -> Result<(String, String), ConfigError> {
    parse_threshold_option(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_full_command_line() {
        let cli = GaleScenarioCli::try_parse_from([
            "basic_load",
            "--connection-string",
            "http://localhost:8080",
            "--stage=30s:20",
            "--stage=1m:0",
            "--vus=2",
            "--graceful-stop=5s",
            "--threshold=http_req_duration:p(95)<500",
            "--abort-on-fail",
            "--no-progress",
            "--run-id=nightly",
        ])
        .unwrap();

        assert_eq!(Some("http://localhost:8080".to_string()), cli.connection_string);
        assert_eq!(
            vec![
                Stage::new(Duration::from_secs(30), 20),
                Stage::new(Duration::from_secs(60), 0)
            ],
            cli.stage
        );
        assert_eq!(Some(2), cli.vus);
        assert_eq!(Some(Duration::from_secs(5)), cli.graceful_stop);
        assert_eq!(
            vec![("http_req_duration".to_string(), "p(95)<500".to_string())],
            cli.threshold
        );
        assert!(cli.abort_on_fail);
        assert!(cli.no_progress);
        assert!(!cli.no_summary);
        assert_eq!(Some("nightly".to_string()), cli.run_id);
    }

    #[test]
    fn malformed_stage_is_rejected() {
        assert!(GaleScenarioCli::try_parse_from(["basic_load", "--stage=30s"]).is_err());
        assert!(GaleScenarioCli::try_parse_from(["basic_load", "--graceful-stop=-1s"]).is_err());
    }
}
