mod cli;
mod config;
mod context;
mod definition;
mod executor;
mod init;
mod monitor;
mod progress;
mod run;
mod scheduler;
mod shutdown;
mod stage;
mod step;
mod transport;
mod types;
mod vu;

pub mod prelude {
    pub use crate::cli::GaleScenarioCli;
    pub use crate::config::{parse_duration, ConfigError, RunConfigFile, StageConfig};
    pub use crate::context::UserValuesConstraint;
    pub use crate::context::{AgentContext, RunnerContext};
    pub use crate::definition::{
        AgentHookMut, GlobalHook, GlobalHookMut, HookResult, ScenarioDefinitionBuilder,
    };
    pub use crate::executor::Executor;
    pub use crate::init::init;
    pub use crate::run::{exit_code, run};
    pub use crate::stage::{RampProfile, Stage};
    pub use crate::step::{Check, FnStep, Step, StepDefinition, StepOutput};
    pub use crate::transport::{
        Method, Transport, TransportRequest, TransportResponse, DEFAULT_REQUEST_TIMEOUT,
    };
    pub use crate::types::GaleResult;

    pub use gale_core::prelude::{ShutdownSignalError, VuBailError};
    pub use gale_instruments::duration_ms;
    pub use gale_instruments::prelude::{MetricKind, MetricsRegistry, RecordError};
    pub use gale_summary_model::{RunOutcome, RunSummary, ThresholdStatus};
}
