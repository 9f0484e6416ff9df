use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gale_instruments::prelude::{RecordError, ThresholdParseError};
use serde::Deserialize;

/// Problems with a scenario's configuration. These are reported before any virtual user starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid duration `{0}`, expected a value like 500ms, 30s, 1m30s or 2h")]
    InvalidDuration(String),
    #[error("invalid stage `{0}`, expected DURATION:TARGET such as 30s:20")]
    InvalidStage(String),
    #[error("the ramp profile has no stages")]
    EmptyProfile,
    #[error("invalid threshold `{expression}` for metric `{metric}`: {source}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        #[source]
        source: ThresholdParseError,
    },
    #[error("invalid threshold `{0}`, expected METRIC:EXPRESSION such as http_req_duration:p(95)<500")]
    InvalidThresholdOption(String),
    #[error("step `{0}` is defined more than once")]
    DuplicateStep(String),
    #[error("the scenario has no steps")]
    NoSteps,
    #[error("the scheduler tick must be greater than zero")]
    ZeroTick,
    #[error("invalid metric definition: {0}")]
    Metric(#[from] RecordError),
    #[error("failed to load run config from {}: {reason}", path.display())]
    ConfigFile { path: PathBuf, reason: String },
}

/// Parse a duration such as `500ms`, `30s`, `1m30s` or `2h`.
///
/// Components are summed and may be separated by spaces. A bare `0` is accepted, any other number
/// needs a unit.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let trimmed = input.trim();
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    humantime::parse_duration(trimmed)
        .map_err(|_| ConfigError::InvalidDuration(input.to_string()))
}

/// Parse a `--threshold` option of the form `METRIC:EXPRESSION`.
pub(crate) fn parse_threshold_option(input: &str) -> Result<(String, String), ConfigError> {
    let (metric, expression) = input
        .split_once(':')
        .filter(|(metric, expression)| !metric.trim().is_empty() && !expression.trim().is_empty())
        .ok_or_else(|| ConfigError::InvalidThresholdOption(input.to_string()))?;

    Ok((metric.trim().to_string(), expression.trim().to_string()))
}

/// Run settings read from a TOML file passed with `--config`.
///
/// ```toml
/// vus_initial = 0
/// graceful_stop = "30s"
/// abort_on_fail = false
/// stages = [
///     { duration = "30s", target = 20 },
///     { duration = "1m", target = 50 },
/// ]
///
/// [thresholds]
/// http_req_duration = ["p(95)<500"]
/// http_req_failed = ["rate<0.05"]
/// ```
///
/// Every field is optional. Stages from the file replace the scenario's stages and thresholds are
/// added to the scenario's thresholds.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RunConfigFile {
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<String>>,
    pub vus_initial: Option<usize>,
    pub graceful_stop: Option<String>,
    pub abort_on_fail: Option<bool>,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub duration: String,
    pub target: usize,
}

impl RunConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_error = |reason: String| ConfigError::ConfigFile {
            path: path.to_path_buf(),
            reason,
        };

        let content = std::fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        toml::from_str(&content).map_err(|e| config_error(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn parse_simple_durations() {
        assert_eq!(Duration::from_millis(500), parse_duration("500ms").unwrap());
        assert_eq!(Duration::from_secs(30), parse_duration("30s").unwrap());
        assert_eq!(Duration::from_secs(60), parse_duration("1m").unwrap());
        assert_eq!(Duration::from_secs(7200), parse_duration("2h").unwrap());
        assert_eq!(Duration::ZERO, parse_duration("0").unwrap());
        assert_eq!(Duration::ZERO, parse_duration("0s").unwrap());
    }

    #[test]
    fn parse_combined_durations() {
        assert_eq!(Duration::from_secs(90), parse_duration("1m30s").unwrap());
        assert_eq!(Duration::from_secs(90), parse_duration(" 1m 30s ").unwrap());
        assert_eq!(
            Duration::from_millis(3_723_250),
            parse_duration("1h2m3s250ms").unwrap()
        );
    }

    #[test]
    fn reject_malformed_durations() {
        for input in ["", "-5s", "30", "5x", "s", "1m30", "1.2.3s"] {
            assert!(
                matches!(parse_duration(input), Err(ConfigError::InvalidDuration(_))),
                "{input}"
            );
        }
    }

    #[test]
    fn parse_threshold_options() {
        assert_eq!(
            ("http_req_duration".to_string(), "p(95)<500".to_string()),
            parse_threshold_option("http_req_duration:p(95)<500").unwrap()
        );
        assert!(parse_threshold_option("http_req_duration").is_err());
        assert!(parse_threshold_option(":rate<0.1").is_err());
    }

    #[test]
    fn load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
vus_initial = 5
graceful_stop = "10s"
stages = [{{ duration = "30s", target = 20 }}, {{ duration = "1m", target = 0 }}]

[thresholds]
http_req_duration = ["p(95)<500", "avg<200"]
"#
        )
        .unwrap();

        let config = RunConfigFile::load(file.path()).unwrap();
        assert_eq!(Some(5), config.vus_initial);
        assert_eq!(Some("10s".to_string()), config.graceful_stop);
        assert_eq!(None, config.abort_on_fail);
        assert_eq!(
            vec![
                StageConfig {
                    duration: "30s".to_string(),
                    target: 20
                },
                StageConfig {
                    duration: "1m".to_string(),
                    target: 0
                }
            ],
            config.stages
        );
        assert_eq!(2, config.thresholds["http_req_duration"].len());
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "duration = 60").unwrap();

        assert!(matches!(
            RunConfigFile::load(file.path()),
            Err(ConfigError::ConfigFile { .. })
        ));
    }
}
