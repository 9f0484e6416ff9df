use std::{fmt::Debug, sync::Arc, time::Duration};

use gale_core::prelude::{DelegatedShutdownListener, ShutdownHandle};
use gale_instruments::prelude::{MetricsRegistry, RecordError};

use crate::executor::Executor;
use crate::transport::{Transport, TransportRequest, TransportResponse};

pub trait UserValuesConstraint: Default + Debug + Send + Sync + 'static {}

/// State shared by the whole run. Hooks get mutable access during setup, virtual users get
/// read access through [AgentContext::runner_context].
#[derive(Debug)]
pub struct RunnerContext<RV: UserValuesConstraint> {
    executor: Arc<Executor>,
    registry: Arc<MetricsRegistry>,
    stop_handle: ShutdownHandle,
    connection_string: Option<String>,
    run_id: String,
    value: RV,
}

impl<RV: UserValuesConstraint> RunnerContext<RV> {
    pub(crate) fn new(
        executor: Arc<Executor>,
        registry: Arc<MetricsRegistry>,
        stop_handle: ShutdownHandle,
        connection_string: Option<String>,
        run_id: String,
    ) -> Self {
        Self {
            executor,
            registry,
            stop_handle,
            connection_string,
            run_id,
            value: Default::default(),
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// The metrics registry for this run.
    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    /// The connection string passed with `--connection-string`, if any.
    pub fn get_connection_string(&self) -> Option<&str> {
        self.connection_string.as_deref()
    }

    pub fn get_run_id(&self) -> &str {
        &self.run_id
    }

    /// Gracefully stop the run. Virtual users finish their current step and no new iterations are
    /// started.
    pub fn force_stop_scenario(&self) {
        log::info!("Scenario requested a stop");
        self.stop_handle.shutdown();
    }

    pub fn get_mut(&mut self) -> &mut RV {
        &mut self.value
    }

    pub fn get(&self) -> &RV {
        &self.value
    }
}

/// The context of one virtual user, passed to every step it runs.
pub struct AgentContext<RV: UserValuesConstraint, V: UserValuesConstraint> {
    vu_id: usize,
    iteration: u64,
    runner_context: Arc<RunnerContext<RV>>,
    stop_listener: DelegatedShutdownListener,
    retire_listener: DelegatedShutdownListener,
    value: V,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> AgentContext<RV, V> {
    pub(crate) fn new(
        vu_id: usize,
        runner_context: Arc<RunnerContext<RV>>,
        stop_listener: DelegatedShutdownListener,
        retire_listener: DelegatedShutdownListener,
    ) -> Self {
        Self {
            vu_id,
            iteration: 0,
            runner_context,
            stop_listener,
            retire_listener,
            value: Default::default(),
        }
    }

    /// The id of this virtual user. Ids are unique within a run and never reused.
    pub fn vu_id(&self) -> usize {
        self.vu_id
    }

    /// The number of iterations this virtual user started before the current one.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub(crate) fn set_iteration(&mut self, iteration: u64) {
        self.iteration = iteration;
    }

    pub fn runner_context(&self) -> &Arc<RunnerContext<RV>> {
        &self.runner_context
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        self.runner_context.registry()
    }

    /// True once the run has been stopped. The virtual user will exit after the current step.
    pub fn is_stopping(&self) -> bool {
        self.stop_listener.should_shutdown()
    }

    /// True once this virtual user has been retired or the run has been stopped. No new iteration
    /// will be started.
    pub fn is_retiring(&self) -> bool {
        self.retire_listener.should_shutdown()
    }

    /// Cooperative think time.
    ///
    /// Returns early if the virtual user is retired or the run is stopped while waiting. Returns
    /// `true` if the whole pause elapsed.
    pub fn pause(&mut self, duration: Duration) -> bool {
        let executor = self.runner_context.executor().clone();
        let listener = &mut self.retire_listener;
        executor
            .execute_in_place(async move { Ok(listener.pause(duration).await) })
            .unwrap_or(false)
    }

    /// Execute a request and wait for the response.
    pub fn execute<T: Transport + ?Sized>(
        &self,
        transport: &T,
        request: TransportRequest,
    ) -> anyhow::Result<TransportResponse> {
        let response = transport.execute(request);
        self.runner_context
            .executor()
            .execute_in_place(async move { Ok(response.await) })
    }

    /// Record the result of a check that was evaluated by the step itself.
    ///
    /// This is recorded exactly like a check attached to the step definition.
    pub fn record_check(&self, name: &str, passed: bool) -> Result<(), RecordError> {
        self.registry().add_rate(name, passed)?;
        self.registry().add_rate(crate::vu::CHECKS_METRIC, passed)
    }

    pub fn record_rate(&self, name: &str, value: bool) -> Result<(), RecordError> {
        self.registry().add_rate(name, value)
    }

    pub fn record_trend(&self, name: &str, value: f64) -> Result<(), RecordError> {
        self.registry().add_trend(name, value)
    }

    pub fn add_counter(&self, name: &str, count: u64) -> Result<(), RecordError> {
        self.registry().add_counter(name, count)
    }

    pub fn get_mut(&mut self) -> &mut V {
        &mut self.value
    }

    pub fn get(&self) -> &V {
        &self.value
    }
}
