use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gale_instruments::prelude::{
    MetricsRegistry, ReportConfig, Threshold, DEFAULT_TREND_SAMPLE_LIMIT,
};

use crate::cli::GaleScenarioCli;
use crate::config::{parse_duration, ConfigError, RunConfigFile};
use crate::context::{AgentContext, RunnerContext, UserValuesConstraint};
use crate::init::init;
use crate::stage::{RampProfile, Stage};
use crate::step::StepDefinition;
use crate::types::GaleResult;
use crate::vu::EngineMetrics;

pub type HookResult = anyhow::Result<()>;

pub type GlobalHookMut<RV> = fn(&mut RunnerContext<RV>) -> HookResult;
pub type GlobalHook<RV> = fn(Arc<RunnerContext<RV>>) -> HookResult;
pub type AgentHookMut<RV, V> = fn(&mut AgentContext<RV, V>) -> HookResult;

const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);
const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// The builder for a scenario definition.
///
/// This must be used at the start of a test to define the scenario that you want to run.
pub struct ScenarioDefinitionBuilder<RV: UserValuesConstraint, V: UserValuesConstraint> {
    /// The name of the scenario, which should be unique within the test suite.
    ///
    /// Recommended value is `env!("CARGO_PKG_NAME")`.
    name: String,
    /// This value is initialised for you and you cannot change it.
    #[doc(hidden)]
    cli: GaleScenarioCli,
    /// The ramp profile as `(duration, target)` pairs. Durations are parsed when the scenario is
    /// built so that a malformed duration is reported as a configuration error.
    stages: Vec<(String, usize)>,
    vus_initial: usize,
    graceful_stop: Duration,
    tick: Duration,
    thresholds: Vec<(String, String)>,
    abort_on_fail: bool,
    trend_sample_limit: usize,
    iterations_per_vu: Option<u64>,
    default_summary_json: Option<PathBuf>,
    default_connection_string: Option<String>,
    /// Global setup hook for this scenario. It will be run once, before any virtual users are
    /// started.
    setup_fn: Option<GlobalHookMut<RV>>,
    /// Setup hook for a virtual user, which will be run once for each virtual user as it starts.
    ///
    /// If it fails then that virtual user exits without running any iterations. The scheduler
    /// starts a replacement on the next tick.
    setup_agent_fn: Option<AgentHookMut<RV, V>>,
    /// The steps that every virtual user runs, in order, on each iteration.
    steps: Vec<StepDefinition<RV, V>>,
    /// Teardown hook for a virtual user, run once as it exits. Best effort.
    teardown_agent_fn: Option<AgentHookMut<RV, V>>,
    /// Global teardown hook, run once after every virtual user has exited. Best effort.
    teardown_fn: Option<GlobalHook<RV>>,
}

/// A validated scenario, ready to run.
pub(crate) struct ScenarioDefinition<RV: UserValuesConstraint, V: UserValuesConstraint> {
    pub(crate) name: String,
    pub(crate) run_id: String,
    pub(crate) connection_string: Option<String>,
    pub(crate) registry: Arc<MetricsRegistry>,
    pub(crate) metrics: EngineMetrics,
    pub(crate) profile: RampProfile,
    pub(crate) thresholds: Vec<Threshold>,
    pub(crate) graceful_stop: Duration,
    pub(crate) tick: Duration,
    pub(crate) abort_on_fail: bool,
    pub(crate) iterations_per_vu: Option<u64>,
    pub(crate) no_progress: bool,
    pub(crate) report: ReportConfig,
    pub(crate) setup_fn: Option<GlobalHookMut<RV>>,
    pub(crate) setup_agent_fn: Option<AgentHookMut<RV, V>>,
    pub(crate) steps: Vec<StepDefinition<RV, V>>,
    pub(crate) teardown_agent_fn: Option<AgentHookMut<RV, V>>,
    pub(crate) teardown_fn: Option<GlobalHook<RV>>,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> ScenarioDefinitionBuilder<RV, V> {
    /// Initialise a new scenario definition from the scenario name and command line arguments.
    ///
    /// Most scenarios should use [ScenarioDefinitionBuilder::new_with_init] instead.
    pub fn new(name: &str, cli: GaleScenarioCli) -> Self {
        Self {
            name: name.to_string(),
            cli,
            stages: Vec::new(),
            vus_initial: 0,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
            tick: DEFAULT_TICK,
            thresholds: Vec::new(),
            abort_on_fail: false,
            trend_sample_limit: DEFAULT_TREND_SAMPLE_LIMIT,
            iterations_per_vu: None,
            default_summary_json: None,
            default_connection_string: None,
            setup_fn: None,
            setup_agent_fn: None,
            steps: Vec::new(),
            teardown_agent_fn: None,
            teardown_fn: None,
        }
    }

    /// Set up logging, parse the command line and create a new scenario definition.
    pub fn new_with_init(name: &str) -> GaleResult<Self> {
        let cli = init();

        Ok(Self::new(name, cli))
    }

    /// Append a stage to the ramp profile. Over `duration`, the number of virtual users moves
    /// linearly from the previous stage's target to `target`.
    ///
    /// The duration accepts values such as `500ms`, `30s` or `1m30s`. Stages given on the command
    /// line or in a config file replace the stages defined here.
    pub fn with_stage(mut self, duration: &str, target: usize) -> Self {
        self.stages.push((duration.to_string(), target));
        self
    }

    /// The number of virtual users the first stage ramps from. Defaults to 0.
    pub fn with_vus_initial(mut self, vus: usize) -> Self {
        self.vus_initial = vus;
        self
    }

    /// How long virtual users get to finish their current iteration once the run is stopped or the
    /// ramp profile ends. Work that is still in flight after this is abandoned. Defaults to 30s.
    pub fn with_graceful_stop(mut self, graceful_stop: Duration) -> Self {
        self.graceful_stop = graceful_stop;
        self
    }

    /// How often the scheduler reconciles the number of running virtual users. Defaults to 1s and
    /// must not be zero.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Add a threshold on a metric, for example `with_threshold("http_req_duration", "p(95)<500")`.
    ///
    /// The expression is parsed when the scenario is built.
    pub fn with_threshold(mut self, metric: &str, expression: &str) -> Self {
        self.thresholds
            .push((metric.to_string(), expression.to_string()));
        self
    }

    /// Check thresholds on every scheduler tick and stop the run as soon as one fails.
    pub fn with_abort_on_fail(mut self) -> Self {
        self.abort_on_fail = true;
        self
    }

    /// The number of samples a trend keeps before it switches to approximate percentiles.
    pub fn with_trend_sample_limit(mut self, limit: usize) -> Self {
        self.trend_sample_limit = limit;
        self
    }

    /// Limit each virtual user to a fixed number of iterations. A virtual user that has run all of
    /// its iterations keeps its slot in the pool until the ramp profile scales down.
    pub fn with_iterations_per_vu(mut self, iterations: u64) -> Self {
        self.iterations_per_vu = Some(iterations);
        self
    }

    /// Write the JSON summary to this path unless `--summary-json` is given.
    pub fn with_default_summary_json(mut self, path: impl Into<PathBuf>) -> Self {
        self.default_summary_json = Some(path.into());
        self
    }

    /// The connection string to use when `--connection-string` is not given.
    pub fn with_default_connection_string(mut self, connection_string: &str) -> Self {
        self.default_connection_string = Some(connection_string.to_string());
        self
    }

    /// Set the global setup hook [ScenarioDefinitionBuilder::setup_fn] for this scenario.
    pub fn use_setup(mut self, setup_fn: GlobalHookMut<RV>) -> Self {
        self.setup_fn = Some(setup_fn);
        self
    }

    /// Set the agent setup hook [ScenarioDefinitionBuilder::setup_agent_fn] for this scenario.
    pub fn use_agent_setup(mut self, setup_agent_fn: AgentHookMut<RV, V>) -> Self {
        self.setup_agent_fn = Some(setup_agent_fn);
        self
    }

    /// Use a single hook as the whole iteration. It is recorded as one step named `behaviour`.
    pub fn use_agent_behaviour(self, behaviour: AgentHookMut<RV, V>) -> Self {
        self.with_step(StepDefinition::from_hook("behaviour", behaviour))
    }

    /// Append a step to the iteration.
    pub fn with_step(mut self, step: StepDefinition<RV, V>) -> Self {
        self.steps.push(step);
        self
    }

    /// Set the agent teardown hook [ScenarioDefinitionBuilder::teardown_agent_fn] for this scenario.
    pub fn use_agent_teardown(mut self, teardown_agent_fn: AgentHookMut<RV, V>) -> Self {
        self.teardown_agent_fn = Some(teardown_agent_fn);
        self
    }

    /// Set the global teardown hook [ScenarioDefinitionBuilder::teardown_fn] for this scenario.
    pub fn use_teardown(mut self, teardown_fn: GlobalHook<RV>) -> Self {
        self.teardown_fn = Some(teardown_fn);
        self
    }

    /// Merge the command line, the config file and the builder settings, in that order of
    /// precedence, and validate the result.
    pub(crate) fn build(self) -> Result<ScenarioDefinition<RV, V>, ConfigError> {
        let file = match &self.cli.config {
            Some(path) => RunConfigFile::load(path)?,
            None => RunConfigFile::default(),
        };

        let stages = if !self.cli.stage.is_empty() {
            self.cli.stage.clone()
        } else if !file.stages.is_empty() {
            file.stages
                .iter()
                .map(|stage| Ok(Stage::new(parse_duration(&stage.duration)?, stage.target)))
                .collect::<Result<_, ConfigError>>()?
        } else {
            self.stages
                .iter()
                .map(|(duration, target)| Ok(Stage::new(parse_duration(duration)?, *target)))
                .collect::<Result<_, ConfigError>>()?
        };

        let vus_initial = self
            .cli
            .vus
            .or(file.vus_initial)
            .unwrap_or(self.vus_initial);
        let profile = RampProfile::new(stages, vus_initial)?;

        let graceful_stop = match (self.cli.graceful_stop, &file.graceful_stop) {
            (Some(graceful_stop), _) => graceful_stop,
            (None, Some(graceful_stop)) => parse_duration(graceful_stop)?,
            (None, None) => self.graceful_stop,
        };

        if self.tick.is_zero() {
            return Err(ConfigError::ZeroTick);
        }

        let abort_on_fail =
            self.cli.abort_on_fail || file.abort_on_fail.unwrap_or(self.abort_on_fail);

        let thresholds = self
            .thresholds
            .iter()
            .cloned()
            .chain(file.thresholds.iter().flat_map(|(metric, expressions)| {
                expressions
                    .iter()
                    .map(move |expression| (metric.clone(), expression.clone()))
            }))
            .chain(self.cli.threshold.iter().cloned())
            .map(|(metric, expression)| {
                Threshold::new(&metric, &expression).map_err(|source| {
                    ConfigError::InvalidThreshold {
                        metric,
                        expression,
                        source,
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if self.steps.is_empty() {
            return Err(ConfigError::NoSteps);
        }
        let mut step_names = HashSet::new();
        for step in &self.steps {
            if !step_names.insert(step.name()) {
                return Err(ConfigError::DuplicateStep(step.name().to_string()));
            }
        }

        let registry = Arc::new(MetricsRegistry::with_trend_sample_limit(
            self.trend_sample_limit,
        ));
        let metrics = EngineMetrics::resolve(&registry, &self.steps)?;

        let mut report = ReportConfig::default();
        if !self.cli.no_summary {
            report = report.enable_text_summary();
        }
        if let Some(path) = self.cli.summary_json.clone().or(self.default_summary_json) {
            report = report.enable_json(path);
        }
        if let Some(path) = self.cli.summary_jsonl.clone() {
            report = report.enable_jsonl(path);
        }

        Ok(ScenarioDefinition {
            name: self.name,
            run_id: self
                .cli
                .run_id
                .clone()
                .unwrap_or_else(|| nanoid::nanoid!()),
            connection_string: self
                .cli
                .connection_string
                .clone()
                .or(self.default_connection_string),
            registry,
            metrics,
            profile,
            thresholds,
            graceful_stop,
            tick: self.tick,
            abort_on_fail,
            iterations_per_vu: self.iterations_per_vu,
            no_progress: self.cli.no_progress,
            report,
            setup_fn: self.setup_fn,
            setup_agent_fn: self.setup_agent_fn,
            steps: self.steps,
            teardown_agent_fn: self.teardown_agent_fn,
            teardown_fn: self.teardown_fn,
        })
    }
}
