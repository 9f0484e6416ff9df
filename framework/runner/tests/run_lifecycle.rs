use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use gale_runner::prelude::{
    exit_code, run, GaleScenarioCli, HookResult, RunOutcome, RunnerContext,
    ScenarioDefinitionBuilder, StepDefinition, StepOutput, ThresholdStatus, UserValuesConstraint,
};
use gale_summary_model::load_run_summary;
use pretty_assertions::assert_eq;

#[derive(Default, Debug)]
struct RunValues {
    calls: AtomicU64,
}

impl UserValuesConstraint for RunValues {}

#[derive(Default, Debug)]
struct VuValues {}

impl UserValuesConstraint for VuValues {}

type Builder = ScenarioDefinitionBuilder<RunValues, VuValues>;
type TestStep = StepDefinition<RunValues, VuValues>;

fn quiet_cli() -> GaleScenarioCli {
    GaleScenarioCli {
        no_progress: true,
        no_summary: true,
        ..Default::default()
    }
}

fn always_failing_step() -> TestStep {
    TestStep::new("fail", |_| {
        Ok(StepOutput::failure(
            Duration::from_millis(1),
            "service unavailable",
        ))
    })
}

#[test]
fn every_iteration_is_counted_exactly_once() {
    let scenario = Builder::new("every_iteration_is_counted_exactly_once", quiet_cli())
        .with_stage("0s", 100)
        .with_stage("2s", 100)
        .with_tick(Duration::from_millis(50))
        .with_iterations_per_vu(5)
        .with_threshold("ops_failed", "rate<0.2")
        .with_step(
            TestStep::new("flaky", |ctx| {
                let call = ctx.runner_context().get().calls.fetch_add(1, Ordering::SeqCst);
                if call % 10 == 0 {
                    Ok(StepOutput::failure(Duration::from_millis(1), "forced failure"))
                } else {
                    Ok(StepOutput::success(Duration::from_millis(1)))
                }
            })
            .with_check("always passes", |_| true),
        );

    let summary = run(scenario).unwrap();

    assert_eq!(500, summary.ops_total);
    assert_eq!(500, summary.iterations);
    assert_eq!(0.1, summary.rates["ops_failed"].rate);
    assert_eq!(50, summary.rates["ops_failed"].passes);
    assert_eq!(500, summary.trends["op_duration"].count);
    assert_eq!(500, summary.rates["checks"].passes);
    assert_eq!(500, summary.rates["always passes"].passes);
    assert_eq!(100, summary.vus.peak);
    assert_eq!(RunOutcome::Passed, summary.outcome);
    assert_eq!(0, exit_code(&Ok(summary)));
}

#[test]
fn failed_threshold_fails_the_run() {
    let scenario = Builder::new("failed_threshold_fails_the_run", quiet_cli())
        .with_stage("0s", 2)
        .with_stage("200ms", 2)
        .with_tick(Duration::from_millis(20))
        .with_threshold("ops_failed", "rate<0.5")
        .with_threshold("never_recorded", "count>0")
        .with_step(always_failing_step());

    let summary = run(scenario).unwrap();

    assert_eq!(RunOutcome::ThresholdsFailed, summary.outcome);
    assert_eq!(
        vec![ThresholdStatus::Fail, ThresholdStatus::NoData],
        summary
            .thresholds
            .iter()
            .map(|verdict| verdict.status)
            .collect::<Vec<_>>()
    );
    assert_eq!(99, exit_code(&Ok(summary)));
}

#[test]
fn abort_on_fail_stops_the_run_early() {
    let scenario = Builder::new("abort_on_fail_stops_the_run_early", quiet_cli())
        .with_stage("0s", 2)
        .with_stage("30s", 2)
        .with_tick(Duration::from_millis(20))
        .with_threshold("ops_failed", "rate<0.1")
        .with_abort_on_fail()
        .with_step(always_failing_step().with_think_time(Duration::from_millis(5)));

    let summary = run(scenario).unwrap();

    assert_eq!(RunOutcome::AbortedByThreshold, summary.outcome);
    assert!(summary.wall_time_ms < 10_000);
    assert_eq!(108, exit_code(&Ok(summary)));
}

#[test]
fn thresholds_without_data_do_not_abort_the_run() {
    let scenario = Builder::new("thresholds_without_data_do_not_abort_the_run", quiet_cli())
        .with_stage("300ms", 0)
        .with_tick(Duration::from_millis(20))
        .with_threshold("never_recorded", "rate<0.1")
        .with_abort_on_fail()
        .with_step(always_failing_step());

    let summary = run(scenario).unwrap();

    assert_eq!(RunOutcome::ThresholdsFailed, summary.outcome);
    assert!(summary.wall_time_ms >= 300);
}

#[test]
fn configuration_errors_are_reported_before_setup() {
    static SETUP_RAN: AtomicBool = AtomicBool::new(false);

    fn setup(_ctx: &mut RunnerContext<RunValues>) -> HookResult {
        SETUP_RAN.store(true, Ordering::SeqCst);
        Ok(())
    }

    let scenario = Builder::new("configuration_errors_are_reported_before_setup", quiet_cli())
        .with_stage("10s", 5)
        .with_threshold("http_req_duration", "p(95)<<500")
        .use_setup(setup)
        .with_step(always_failing_step());

    let result = run(scenario);

    assert_eq!(104, exit_code(&result));
    assert!(!SETUP_RAN.load(Ordering::SeqCst));
}

#[test]
fn zero_target_first_stage_starts_no_vu() {
    static STEPS: AtomicUsize = AtomicUsize::new(0);

    let scenario = Builder::new("zero_target_first_stage_starts_no_vu", quiet_cli())
        .with_stage("0s", 0)
        .with_step(TestStep::new("count", |_| {
            STEPS.fetch_add(1, Ordering::SeqCst);
            Ok(StepOutput::success(Duration::ZERO))
        }));

    let summary = run(scenario).unwrap();

    assert_eq!(0, STEPS.load(Ordering::SeqCst));
    assert_eq!(0, summary.vus.peak);
    assert_eq!(0, summary.ops_total);
    assert_eq!(RunOutcome::Passed, summary.outcome);
}

#[test]
fn vu_retired_mid_pause_does_not_start_another_iteration() {
    let scenario = Builder::new(
        "vu_retired_mid_pause_does_not_start_another_iteration",
        quiet_cli(),
    )
    .with_stage("0s", 1)
    .with_stage("200ms", 1)
    .with_tick(Duration::from_millis(20))
    .with_graceful_stop(Duration::from_secs(20))
    .with_step(
        TestStep::new("think", |_| Ok(StepOutput::success(Duration::from_millis(1))))
            .with_think_time(Duration::from_secs(30)),
    );

    let started = Instant::now();
    let summary = run(scenario).unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(1, summary.ops_total);
    assert_eq!(1, summary.iterations);
}

#[test]
fn in_flight_step_is_recorded_after_retirement() {
    let scenario = Builder::new("in_flight_step_is_recorded_after_retirement", quiet_cli())
        .with_stage("0s", 1)
        .with_stage("100ms", 1)
        .with_tick(Duration::from_millis(20))
        .with_graceful_stop(Duration::from_secs(20))
        .with_iterations_per_vu(1)
        .with_step(TestStep::new("slow", |ctx| {
            let started = Instant::now();
            ctx.runner_context().executor().execute_in_place(async {
                tokio::time::sleep(Duration::from_millis(400)).await;
                Ok(())
            })?;
            Ok(StepOutput::success(started.elapsed()))
        }));

    let summary = run(scenario).unwrap();

    assert_eq!(1, summary.ops_total);
    assert!(summary.trends["op_duration"].min >= 400.0);
}

#[test]
fn work_past_the_graceful_stop_is_abandoned() {
    let scenario = Builder::new("work_past_the_graceful_stop_is_abandoned", quiet_cli())
        .with_stage("0s", 1)
        .with_stage("100ms", 1)
        .with_tick(Duration::from_millis(20))
        .with_graceful_stop(Duration::from_millis(200))
        .with_step(TestStep::new("hangs", |ctx| {
            ctx.runner_context().executor().execute_in_place(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })?;
            Ok(StepOutput::success(Duration::from_secs(30)))
        }));

    let started = Instant::now();
    let summary = run(scenario).unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(0, summary.ops_total);
    assert!(!summary.trends.contains_key("op_duration"));
}

#[test]
fn skipped_steps_record_nothing() {
    let scenario = Builder::new("skipped_steps_record_nothing", quiet_cli())
        .with_stage("0s", 1)
        .with_stage("1s", 1)
        .with_tick(Duration::from_millis(20))
        .with_iterations_per_vu(3)
        .with_step(
            TestStep::new("create", |_| Ok(StepOutput::failure(Duration::ZERO, "rejected")))
                .with_trend("create_duration")
                .with_failure_rate("errors"),
        )
        .with_step(
            TestStep::new("fetch", |_| Ok(StepOutput::success(Duration::ZERO)))
                .with_trend("fetch_duration")
                .when(|ctx| ctx.iteration() > 0),
        );

    let summary = run(scenario).unwrap();

    assert_eq!(3, summary.trends["create_duration"].count);
    assert_eq!(2, summary.trends["fetch_duration"].count);
    assert_eq!(1.0, summary.rates["errors"].rate);
    assert_eq!(5, summary.ops_total);
}

#[test]
fn summary_is_written_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results").join("summary.json");

    let cli = GaleScenarioCli {
        summary_json: Some(path.clone()),
        run_id: Some("json-run".to_string()),
        ..quiet_cli()
    };
    let scenario = Builder::new("summary_is_written_as_json", cli)
        .with_stage("0s", 1)
        .with_stage("100ms", 1)
        .with_tick(Duration::from_millis(20))
        .with_iterations_per_vu(1)
        .with_step(always_failing_step());

    let summary = run(scenario).unwrap();

    let stored = load_run_summary(std::fs::File::open(path).unwrap()).unwrap();
    assert_eq!("json-run", stored.run_id);
    assert_eq!(summary.ops_total, stored.ops_total);
    assert_eq!(summary.outcome, stored.outcome);
    assert_eq!(summary.fingerprint(), stored.fingerprint());
}

fn never_reached_step() -> TestStep {
    TestStep::new("confirm", |_| Ok(StepOutput::success(Duration::ZERO)))
        .with_trend("confirm_duration")
}

#[test]
fn step_error_ends_the_iteration() {
    let scenario = Builder::new("step_error_ends_the_iteration", quiet_cli())
        .with_stage("0s", 1)
        .with_stage("1s", 1)
        .with_tick(Duration::from_millis(20))
        .with_iterations_per_vu(4)
        .with_step(
            TestStep::new("submit", |_| Err(anyhow::anyhow!("connection reset")))
                .with_trend("submit_duration"),
        )
        .with_step(never_reached_step());

    let summary = run(scenario).unwrap();

    assert_eq!(4, summary.iterations);
    assert_eq!(summary.iterations, summary.ops_total);
    assert_eq!(4, summary.trends["submit_duration"].count);
    assert!(!summary.trends.contains_key("confirm_duration"));
    assert_eq!(1.0, summary.rates["ops_failed"].rate);
}

#[test]
fn step_panic_ends_the_iteration() {
    let scenario = Builder::new("step_panic_ends_the_iteration", quiet_cli())
        .with_stage("0s", 1)
        .with_stage("1s", 1)
        .with_tick(Duration::from_millis(20))
        .with_iterations_per_vu(3)
        .with_step(
            TestStep::new("submit", |_| panic!("unexpected response shape"))
                .with_trend("submit_duration"),
        )
        .with_step(never_reached_step());

    let summary = run(scenario).unwrap();

    assert_eq!(3, summary.iterations);
    assert_eq!(summary.iterations, summary.ops_total);
    assert!(!summary.trends.contains_key("confirm_duration"));
}

#[test]
fn metric_kind_conflict_is_a_configuration_error() {
    let scenario = Builder::new("metric_kind_conflict_is_a_configuration_error", quiet_cli())
        .with_stage("1s", 1)
        .with_step(always_failing_step().with_failure_rate("ops_total"));

    assert_eq!(104, exit_code(&run(scenario)));
}
