use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gale_runner::prelude::{
    run, AgentContext, GaleScenarioCli, HookResult, RunnerContext, ScenarioDefinitionBuilder,
    UserValuesConstraint, VuBailError,
};

#[derive(Default, Debug)]
struct RunnerContextValue {}

impl UserValuesConstraint for RunnerContextValue {}

#[derive(Default, Debug)]
struct AgentContextValue {
    value: i32,
}

impl UserValuesConstraint for AgentContextValue {}

type Builder = ScenarioDefinitionBuilder<RunnerContextValue, AgentContextValue>;

fn sample_cli_cfg() -> GaleScenarioCli {
    GaleScenarioCli {
        connection_string: Some("test_connection_string".to_string()),
        no_progress: true,
        no_summary: true,
        ..Default::default()
    }
}

/// A short profile with a single virtual user.
fn scenario(name: &str) -> Builder {
    Builder::new(name, sample_cli_cfg())
        .with_stage("0s", 1)
        .with_stage("300ms", 1)
        .with_tick(Duration::from_millis(20))
        .with_graceful_stop(Duration::from_secs(5))
}

fn noop_behaviour(_ctx: &mut AgentContext<RunnerContextValue, AgentContextValue>) -> HookResult {
    Ok(())
}

#[test]
fn propagate_error_in_setup_hook() {
    fn setup(_tx: &mut RunnerContext<RunnerContextValue>) -> HookResult {
        Err(anyhow::anyhow!("Error in setup hook"))
    }

    let scenario = scenario("propagate_error_in_setup_hook")
        .use_setup(setup)
        .use_agent_behaviour(noop_behaviour);

    let result = run(scenario);

    assert!(result.is_err());
    assert_eq!(result.unwrap_err().to_string(), "Error in setup hook");
}

#[test]
fn capture_error_in_agent_setup() {
    fn agent_setup(_ctx: &mut AgentContext<RunnerContextValue, AgentContextValue>) -> HookResult {
        Err(anyhow::anyhow!("Error in agent setup hook"))
    }

    let scenario = scenario("capture_error_in_agent_setup")
        .use_agent_setup(agent_setup)
        .use_agent_behaviour(noop_behaviour);

    let summary = run(scenario).unwrap();

    // No virtual user got past its setup, so nothing ran.
    assert_eq!(0, summary.ops_total);
    assert_eq!(0, summary.iterations);
}

#[test]
fn capture_error_in_agent_behaviour_and_continue() {
    fn agent_behaviour(
        ctx: &mut AgentContext<RunnerContextValue, AgentContextValue>,
    ) -> HookResult {
        if ctx.get().value < 5 {
            ctx.get_mut().value += 1;
        } else {
            // Save time running this test by shutting down once this has run a few times.
            ctx.runner_context().force_stop_scenario();
        }

        Err(anyhow::anyhow!("Error in agent behaviour hook"))
    }

    let scenario = Builder::new("capture_error_in_agent_behaviour_and_continue", sample_cli_cfg())
        .with_stage("0s", 1)
        .with_stage("30s", 1)
        .with_tick(Duration::from_millis(20))
        .use_agent_behaviour(agent_behaviour);

    let summary = run(scenario).unwrap();

    assert!(summary.ops_total >= 6);
    assert_eq!(summary.ops_total, summary.iterations);
    assert_eq!(1.0, summary.rates["ops_failed"].rate);
    assert!(summary.wall_time_ms < 30_000);
}

#[test]
fn bail_error_stops_vu_and_it_is_replaced() {
    static BAILS: AtomicUsize = AtomicUsize::new(0);

    fn agent_behaviour(
        _ctx: &mut AgentContext<RunnerContextValue, AgentContextValue>,
    ) -> HookResult {
        BAILS.fetch_add(1, Ordering::SeqCst);
        Err(VuBailError::default().into())
    }

    let scenario = scenario("bail_error_stops_vu_and_it_is_replaced")
        .use_agent_behaviour(agent_behaviour);

    let summary = run(scenario).unwrap();

    // Every virtual user bails on its first step, so the scheduler keeps starting new ones.
    assert!(BAILS.load(Ordering::SeqCst) >= 2);
    assert_eq!(0, summary.iterations);
    assert_eq!(1, summary.vus.peak);
}

#[test]
fn capture_panic_in_agent_behaviour() {
    fn agent_behaviour(
        ctx: &mut AgentContext<RunnerContextValue, AgentContextValue>,
    ) -> HookResult {
        if ctx.iteration() >= 2 {
            ctx.runner_context().force_stop_scenario();
        }
        panic!("Panic in agent behaviour hook");
    }

    let scenario = scenario("capture_panic_in_agent_behaviour").use_agent_behaviour(agent_behaviour);

    let summary = run(scenario).unwrap();

    assert!(summary.ops_total >= 3);
    assert_eq!(1.0, summary.rates["ops_failed"].rate);
}

#[test]
fn capture_error_in_agent_teardown() {
    fn agent_teardown(
        _ctx: &mut AgentContext<RunnerContextValue, AgentContextValue>,
    ) -> HookResult {
        Err(anyhow::anyhow!("Error in agent teardown hook"))
    }

    let scenario = scenario("capture_error_in_agent_teardown")
        .use_agent_behaviour(noop_behaviour)
        .use_agent_teardown(agent_teardown);

    let result = run(scenario);

    assert!(result.is_ok());
}

#[test]
fn capture_error_in_teardown() {
    static TEARDOWNS: AtomicUsize = AtomicUsize::new(0);

    fn teardown(_ctx: Arc<RunnerContext<RunnerContextValue>>) -> HookResult {
        TEARDOWNS.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("Error in teardown hook"))
    }

    let scenario = scenario("capture_error_in_teardown")
        .use_agent_behaviour(noop_behaviour)
        .use_teardown(teardown);

    let result = run(scenario);

    assert!(result.is_ok());
    assert_eq!(1, TEARDOWNS.load(Ordering::SeqCst));
}
