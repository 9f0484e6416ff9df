use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use gale_core::prelude::ShutdownHandle;
use gale_instruments::prelude::{
    build_run_summary, evaluate_thresholds, MetricsRegistry, RunMeta, Threshold,
};
use gale_summary_model::{
    RunOutcome, RunSummary, StageSummary, ThresholdStatus, CONFIG_ERROR_EXIT_CODE,
};

use crate::config::ConfigError;
use crate::context::{AgentContext, RunnerContext, UserValuesConstraint};
use crate::definition::ScenarioDefinitionBuilder;
use crate::executor::Executor;
use crate::monitor::start_monitor;
use crate::progress::start_progress;
use crate::scheduler::{SpawnVu, VuPool};
use crate::shutdown::start_shutdown_listener;
use crate::types::GaleResult;
use crate::vu::{run_vu, Behaviour};

/// How often draining checks whether every virtual user has exited.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Run a scenario to completion and return its summary.
///
/// Configuration errors are returned before any virtual user is started, as are errors from the
/// setup hook. Everything that goes wrong inside a virtual user is recorded in metrics instead.
/// Use [exit_code] to turn the result into the process exit code.
pub fn run<RV: UserValuesConstraint, V: UserValuesConstraint>(
    definition: ScenarioDefinitionBuilder<RV, V>,
) -> GaleResult<RunSummary> {
    let definition = definition.build()?;

    log::info!(
        "Running scenario `{}` with run id {} ({} stages over {:?})",
        definition.name,
        definition.run_id,
        definition.profile.stages().len(),
        definition.profile.total_duration()
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let stop_handle = ShutdownHandle::new();
    let abort_handle = ShutdownHandle::new();
    let interrupted = start_shutdown_listener(&runtime, stop_handle.clone());
    let executor = Arc::new(Executor::new(runtime, abort_handle.clone()));

    let registry = definition.registry;

    let mut runner_context = RunnerContext::new(
        executor,
        registry.clone(),
        stop_handle.clone(),
        definition.connection_string.clone(),
        definition.run_id.clone(),
    );

    if let Some(setup_fn) = definition.setup_fn {
        setup_fn(&mut runner_context)?;
    }

    let runner_context = Arc::new(runner_context);
    let behaviour = Arc::new(Behaviour {
        steps: definition.steps,
        metrics: definition.metrics,
        setup_agent_fn: definition.setup_agent_fn,
        teardown_agent_fn: definition.teardown_agent_fn,
        iterations_per_vu: definition.iterations_per_vu,
    });

    let spawn: SpawnVu = {
        let runner_context = runner_context.clone();
        let stop_handle = stop_handle.clone();
        Box::new(move |vu_id: usize, retire_handle: &ShutdownHandle| {
            let context = AgentContext::new(
                vu_id,
                runner_context.clone(),
                stop_handle.new_listener(),
                retire_handle.new_listener(),
            );
            let behaviour = behaviour.clone();

            std::thread::Builder::new()
                .name(format!("vu-{vu_id}"))
                .spawn(move || run_vu(context, behaviour))
        })
    };
    let mut pool = VuPool::new(stop_handle.clone(), spawn);

    // Stops the progress bar and the resource monitor once the run is over.
    let finished_handle = ShutdownHandle::new();
    if !definition.no_progress {
        start_progress(
            definition.profile.total_duration(),
            finished_handle.new_listener(),
        );
    }
    start_monitor(finished_handle.new_listener());

    let started_at = chrono::Utc::now().timestamp();
    let start = Instant::now();

    let mut scheduler = Scheduler {
        runner_context: &runner_context,
        registry: &registry,
        stop_handle: &stop_handle,
        pool: &mut pool,
        thresholds: &definition.thresholds,
        abort_on_fail: definition.abort_on_fail,
        tick: definition.tick,
    };
    let scheduled = scheduler.run(&definition.profile, start);

    log::info!("Draining {} virtual users", pool.running());
    pool.retire_all();
    let grace_deadline = Instant::now() + definition.graceful_stop;
    while !pool.is_drained() {
        let now = Instant::now();
        if now >= grace_deadline {
            break;
        }
        std::thread::sleep(DRAIN_POLL_INTERVAL.min(grace_deadline - now));
    }

    // Read after draining so that Ctrl-C during the grace period still counts.
    let stopped_early = stop_reason(&scheduled, &interrupted);

    let wall_time = start.elapsed();
    let snapshot = registry.snapshot();
    registry.seal();

    if !pool.is_drained() {
        abort_handle.shutdown();
        let abandoned = pool.abandon();
        log::warn!(
            "Graceful stop of {:?} ran out, abandoned {abandoned} virtual users",
            definition.graceful_stop
        );
    }
    log::info!("Run complete after {wall_time:?}");

    if let Some(teardown_fn) = definition.teardown_fn {
        // Don't crash the runner if the teardown fails. We still want the reporting and runner
        // shutdown to happen cleanly. The hook is documented as 'best effort'
        if let Err(e) = teardown_fn(runner_context.clone()) {
            log::error!("Teardown failed: {:?}", e);
        }
    }

    finished_handle.shutdown();
    // A failure to start virtual users is an infrastructure fault, not a result.
    scheduled?;

    let verdicts = evaluate_thresholds(&snapshot, &definition.thresholds);
    for verdict in verdicts.iter().filter(|v| !v.passed()) {
        log::error!(
            "Threshold `{}` on `{}` did not pass: {}",
            verdict.expression,
            verdict.metric,
            verdict.reason.as_deref().unwrap_or("unknown reason")
        );
    }

    let meta = RunMeta {
        run_id: definition.run_id,
        scenario_name: definition.name,
        started_at,
        stages: definition
            .profile
            .stages()
            .iter()
            .map(StageSummary::from)
            .collect(),
        wall_time,
        vus_initial: definition.profile.initial(),
        peak_vus: pool.peak(),
        stopped_early,
    };
    let summary = build_run_summary(&meta, &snapshot, verdicts);

    definition
        .report
        .emit(&summary)
        .context("Failed to write the run summary")?;

    Ok(summary)
}

/// Why the run ended before its ramp profile did, if it did. An interrupt wins over a threshold
/// abort.
fn stop_reason(
    scheduled: &anyhow::Result<Option<RunOutcome>>,
    interrupted: &AtomicBool,
) -> Option<RunOutcome> {
    if interrupted.load(Ordering::SeqCst) {
        return Some(RunOutcome::Interrupted);
    }

    match scheduled {
        Ok(stopped_early) => *stopped_early,
        Err(_) => None,
    }
}

/// The process exit code for the result of [run].
///
/// Errors are logged here, so a scenario's `main` can pass the result straight through.
pub fn exit_code(result: &GaleResult<RunSummary>) -> i32 {
    match result {
        Ok(summary) => summary.outcome.exit_code(),
        Err(e) if e.is::<ConfigError>() => {
            log::error!("Invalid configuration: {e}");
            CONFIG_ERROR_EXIT_CODE
        }
        Err(e) => {
            log::error!("Run failed: {e:?}");
            1
        }
    }
}

/// The periodic coordinator that keeps the pool at the desired concurrency.
struct Scheduler<'a, RV: UserValuesConstraint> {
    runner_context: &'a Arc<RunnerContext<RV>>,
    registry: &'a MetricsRegistry,
    stop_handle: &'a ShutdownHandle,
    pool: &'a mut VuPool,
    thresholds: &'a [Threshold],
    abort_on_fail: bool,
    tick: Duration,
}

impl<RV: UserValuesConstraint> Scheduler<'_, RV> {
    /// Tick until the ramp profile ends or the run is stopped.
    ///
    /// Returns the outcome if the run was stopped by a threshold.
    fn run(
        &mut self,
        profile: &crate::stage::RampProfile,
        start: Instant,
    ) -> anyhow::Result<Option<RunOutcome>> {
        let total = profile.total_duration();
        let mut stop_listener = self.stop_handle.new_listener();
        let mut current_stage = None;
        let mut ticks: u32 = 0;

        loop {
            if stop_listener.should_shutdown() {
                log::info!("Run stopped");
                return Ok(None);
            }

            let elapsed = start.elapsed();
            if elapsed >= total {
                log::info!("Ramp profile complete");
                return Ok(None);
            }

            let stage = profile.stage_at(elapsed);
            if stage != current_stage {
                if let Some(index) = stage {
                    let target = profile.stages()[index];
                    log::info!(
                        "Stage {} of {}: ramping to {} virtual users over {:?}",
                        index + 1,
                        profile.stages().len(),
                        target.target,
                        target.duration
                    );
                }
                current_stage = stage;
            }

            if let Err(e) = self.pool.reconcile(profile.desired_at(elapsed)) {
                self.stop_handle.shutdown();
                return Err(e);
            }

            if self.abort_on_fail && self.breached() {
                self.stop_handle.shutdown();
                return Ok(Some(RunOutcome::AbortedByThreshold));
            }

            ticks += 1;
            let next_tick = (start + self.tick * ticks).min(start + total);
            let wait = next_tick.saturating_duration_since(Instant::now());
            self.runner_context
                .executor()
                .execute_in_place(async { Ok(stop_listener.pause(wait).await) })?;
        }
    }

    /// True if any threshold currently fails. Metrics without data yet do not count as a breach.
    fn breached(&self) -> bool {
        let verdicts = evaluate_thresholds(&self.registry.snapshot(), self.thresholds);
        match verdicts
            .iter()
            .find(|verdict| verdict.status == ThresholdStatus::Fail)
        {
            Some(verdict) => {
                log::error!(
                    "Threshold `{}` on `{}` breached, stopping the run: {}",
                    verdict.expression,
                    verdict.metric,
                    verdict.reason.as_deref().unwrap_or("unknown reason")
                );
                true
            }
            None => false,
        }
    }
}
