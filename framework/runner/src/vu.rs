use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use gale_core::prelude::{ShutdownSignalError, VuBailError};
use gale_instruments::duration_ms;
use gale_instruments::prelude::{MetricHandle, MetricKind, MetricsRegistry, OperationRecord, RecordError};

use crate::context::{AgentContext, UserValuesConstraint};
use crate::definition::AgentHookMut;
use crate::step::{StepDefinition, StepOutput};

pub(crate) const OPS_TOTAL_METRIC: &str = "ops_total";
pub(crate) const OPS_FAILED_METRIC: &str = "ops_failed";
pub(crate) const OP_DURATION_METRIC: &str = "op_duration";
pub(crate) const ITERATIONS_METRIC: &str = "iterations";
pub(crate) const CHECKS_METRIC: &str = "checks";

/// Why a virtual user's thread ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VuExit {
    /// Retired by the scheduler after finishing its iteration
    Retired,
    /// The run was stopped
    Stopped,
    /// A step returned [VuBailError]
    Bailed,
    /// The agent setup hook failed
    SetupFailed,
    /// Ran every iteration it was allowed
    Exhausted,
    /// In-flight work was cancelled because the grace period ran out
    Abandoned,
}

enum IterationEnd {
    Completed,
    /// A step returned an error or panicked. The rest of the iteration was skipped.
    Failed,
    Stopped,
    Bailed,
    Aborted,
}

/// Handles for the metrics every step records, resolved once per run.
pub(crate) struct EngineMetrics {
    ops_total: MetricHandle,
    ops_failed: MetricHandle,
    iterations: MetricHandle,
    checks: MetricHandle,
    steps: Vec<StepMetrics>,
}

struct StepMetrics {
    duration: MetricHandle,
    checks: Vec<MetricHandle>,
    failure_rate: Option<MetricHandle>,
}

impl EngineMetrics {
    pub(crate) fn resolve<RV: UserValuesConstraint, V: UserValuesConstraint>(
        registry: &MetricsRegistry,
        steps: &[StepDefinition<RV, V>],
    ) -> Result<Self, RecordError> {
        let steps = steps
            .iter()
            .map(|definition| {
                Ok(StepMetrics {
                    duration: registry.handle(
                        definition.trend.as_deref().unwrap_or(OP_DURATION_METRIC),
                        MetricKind::Trend,
                    )?,
                    checks: definition
                        .checks
                        .iter()
                        .map(|check| registry.handle(&check.name, MetricKind::Rate))
                        .collect::<Result<_, _>>()?,
                    failure_rate: definition
                        .failure_rate
                        .as_deref()
                        .map(|name| registry.handle(name, MetricKind::Rate))
                        .transpose()?,
                })
            })
            .collect::<Result<_, RecordError>>()?;

        Ok(Self {
            ops_total: registry.handle(OPS_TOTAL_METRIC, MetricKind::Counter)?,
            ops_failed: registry.handle(OPS_FAILED_METRIC, MetricKind::Rate)?,
            iterations: registry.handle(ITERATIONS_METRIC, MetricKind::Counter)?,
            checks: registry.handle(CHECKS_METRIC, MetricKind::Rate)?,
            steps,
        })
    }
}

/// Everything a virtual user needs to run the scenario. Shared by all virtual users in a run.
pub(crate) struct Behaviour<RV: UserValuesConstraint, V: UserValuesConstraint> {
    pub(crate) steps: Vec<StepDefinition<RV, V>>,
    pub(crate) metrics: EngineMetrics,
    pub(crate) setup_agent_fn: Option<AgentHookMut<RV, V>>,
    pub(crate) teardown_agent_fn: Option<AgentHookMut<RV, V>>,
    pub(crate) iterations_per_vu: Option<u64>,
}

/// The body of a virtual user's thread.
pub(crate) fn run_vu<RV: UserValuesConstraint, V: UserValuesConstraint>(
    mut context: AgentContext<RV, V>,
    behaviour: Arc<Behaviour<RV, V>>,
) -> VuExit {
    let vu_id = context.vu_id();
    log::debug!("Starting VU {vu_id}");

    if let Some(setup_agent_fn) = behaviour.setup_agent_fn {
        if let Err(e) = setup_agent_fn(&mut context) {
            log::error!("Agent setup failed for VU {vu_id}: {e:?}");
            return VuExit::SetupFailed;
        }
    }

    let exit = behaviour.run_iterations(&mut context);

    if let Some(teardown_agent_fn) = behaviour.teardown_agent_fn {
        if let Err(e) = teardown_agent_fn(&mut context) {
            log::error!("Agent teardown failed for VU {vu_id}: {e:?}");
        }
    }

    log::debug!("VU {vu_id} exited: {exit:?}");
    exit
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> Behaviour<RV, V> {
    fn run_iterations(&self, context: &mut AgentContext<RV, V>) -> VuExit {
        let mut iteration = 0;

        loop {
            if context.is_stopping() {
                return VuExit::Stopped;
            }
            if context.is_retiring() {
                return VuExit::Retired;
            }
            if self
                .iterations_per_vu
                .is_some_and(|limit| iteration >= limit)
            {
                return VuExit::Exhausted;
            }

            context.set_iteration(iteration);
            iteration += 1;

            match self.run_iteration(context) {
                IterationEnd::Completed | IterationEnd::Failed => {
                    record(self.metrics.iterations.add(1));
                }
                IterationEnd::Stopped => return VuExit::Stopped,
                IterationEnd::Bailed => return VuExit::Bailed,
                IterationEnd::Aborted => return VuExit::Abandoned,
            }
        }
    }

    fn run_iteration(&self, context: &mut AgentContext<RV, V>) -> IterationEnd {
        for (definition, metrics) in self.steps.iter().zip(&self.metrics.steps) {
            if context.is_stopping() {
                return IterationEnd::Stopped;
            }

            if let Some(condition) = &definition.condition {
                if !condition(context) {
                    log::trace!("Skipping step `{}`", definition.name());
                    continue;
                }
            }

            let mut operation_record = OperationRecord::new(definition.name());
            let result = catch_unwind(AssertUnwindSafe(|| definition.step.run(context)));

            match result {
                Ok(Ok(output)) => {
                    operation_record.finish(!output.success);
                    let operation_record = operation_record.with_elapsed(output.elapsed);
                    self.record_output(definition, metrics, &operation_record, &output);
                }
                Ok(Err(e)) if e.is::<ShutdownSignalError>() => {
                    log::debug!("Step `{}` was abandoned", definition.name());
                    return IterationEnd::Aborted;
                }
                Ok(Err(e)) if e.is::<VuBailError>() => {
                    log::warn!("VU {} is bailing: {e}", context.vu_id());
                    return IterationEnd::Bailed;
                }
                Ok(Err(e)) => {
                    log::error!(
                        "Step `{}` failed for VU {}: {e:?}",
                        definition.name(),
                        context.vu_id()
                    );
                    operation_record.finish(true);
                    self.record_error(metrics, &operation_record);
                    return IterationEnd::Failed;
                }
                Err(panic) => {
                    log::error!(
                        "Step `{}` panicked for VU {}: {}",
                        definition.name(),
                        context.vu_id(),
                        panic_message(panic.as_ref())
                    );
                    operation_record.finish(true);
                    self.record_error(metrics, &operation_record);
                    return IterationEnd::Failed;
                }
            }

            if let Some(think_time) = definition.think_time {
                context.pause(think_time);
            }
        }

        IterationEnd::Completed
    }

    fn record_output(
        &self,
        definition: &StepDefinition<RV, V>,
        metrics: &StepMetrics,
        operation_record: &OperationRecord,
        output: &StepOutput,
    ) {
        if let Some(error) = &output.error {
            log::debug!("Step `{}` failed: {error}", operation_record.operation_id);
        }

        self.record_operation(metrics, operation_record);

        let mut failed = operation_record.is_error;
        for (check, handle) in definition.checks.iter().zip(&metrics.checks) {
            let passed = check.evaluate(output);
            record(handle.add_bool(passed));
            record(self.metrics.checks.add_bool(passed));
            failed |= !passed;
        }

        if let Some(failure_rate) = &metrics.failure_rate {
            record(failure_rate.add_bool(failed));
        }
    }

    fn record_error(&self, metrics: &StepMetrics, operation_record: &OperationRecord) {
        self.record_operation(metrics, operation_record);

        if let Some(failure_rate) = &metrics.failure_rate {
            record(failure_rate.add_bool(true));
        }
    }

    fn record_operation(&self, metrics: &StepMetrics, operation_record: &OperationRecord) {
        record(self.metrics.ops_total.add(1));
        record(self.metrics.ops_failed.add_bool(operation_record.is_error));
        record(metrics.duration.record(duration_ms(operation_record.duration())));
    }
}

fn record(result: Result<(), RecordError>) {
    if let Err(e) = result {
        log::warn!("Failed to record metric: {e}");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
