use std::str::FromStr;
use std::time::Duration;

use gale_summary_model::StageSummary;

use crate::config::{parse_duration, ConfigError};

/// A time window with a target number of virtual users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

/// Parses `DURATION:TARGET`, for example `30s:20`.
impl FromStr for Stage {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (duration, target) = s
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidStage(s.to_string()))?;

        let target = target
            .trim()
            .parse::<usize>()
            .map_err(|_| ConfigError::InvalidStage(s.to_string()))?;

        Ok(Stage::new(parse_duration(duration)?, target))
    }
}

impl From<&Stage> for StageSummary {
    fn from(stage: &Stage) -> Self {
        StageSummary {
            duration_ms: stage.duration.as_millis() as u64,
            target: stage.target,
        }
    }
}

/// An ordered list of stages, and the concurrency the first stage ramps from.
///
/// Within a stage the number of virtual users moves linearly from the previous stage's target to
/// this stage's target. Zero length stages jump straight to their target.
#[derive(Debug, Clone, PartialEq)]
pub struct RampProfile {
    stages: Vec<Stage>,
    initial: usize,
}

impl RampProfile {
    pub fn new(stages: Vec<Stage>, initial: usize) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::EmptyProfile);
        }

        Ok(Self { stages, initial })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn initial(&self) -> usize {
        self.initial
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|stage| stage.duration).sum()
    }

    /// The desired number of virtual users `elapsed` after the profile started.
    ///
    /// Once the profile has ended this is always zero.
    pub fn desired_at(&self, elapsed: Duration) -> usize {
        let mut previous = self.initial as f64;
        let mut stage_start = Duration::ZERO;

        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                let progress =
                    (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let target = stage.target as f64;
                return (previous + (target - previous) * progress).round() as usize;
            }

            previous = stage.target as f64;
            stage_start = stage_end;
        }

        0
    }

    /// Index of the stage that is running `elapsed` after the profile started.
    pub fn stage_at(&self, elapsed: Duration) -> Option<usize> {
        let mut stage_end = Duration::ZERO;

        self.stages.iter().position(|stage| {
            stage_end += stage.duration;
            elapsed < stage_end
        })
    }
}
