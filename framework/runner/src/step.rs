use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::{AgentContext, UserValuesConstraint};
use crate::transport::TransportResponse;

/// The result of one step.
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    pub success: bool,
    pub elapsed: Duration,
    pub error: Option<String>,
    /// The response the step received, passed to the step's checks
    pub response: Option<TransportResponse>,
}

impl StepOutput {
    pub fn success(elapsed: Duration) -> Self {
        Self {
            success: true,
            elapsed,
            ..Default::default()
        }
    }

    pub fn failure(elapsed: Duration, error: impl Into<String>) -> Self {
        Self {
            success: false,
            elapsed,
            error: Some(error.into()),
            response: None,
        }
    }

    /// A step that made a single request. It succeeded if the transport reported no error and the
    /// status was not an error status.
    pub fn from_response(response: TransportResponse) -> Self {
        let error = response.error.clone().or_else(|| {
            (!response.is_success()).then(|| format!("unexpected status {}", response.status))
        });

        Self {
            success: error.is_none(),
            elapsed: response.elapsed,
            error,
            response: Some(response),
        }
    }

    /// The response status, or `None` if the step has no response.
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|response| response.status)
    }

    /// Parse the response body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        self.response.as_ref().and_then(|response| response.json())
    }
}

/// One unit of work in a scenario, usually a single request.
///
/// Steps are run in order by every virtual user. A step may return an error for faults that it
/// cannot express as a failed [StepOutput]. That ends the current iteration.
pub trait Step<RV: UserValuesConstraint, V: UserValuesConstraint>: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, ctx: &mut AgentContext<RV, V>) -> anyhow::Result<StepOutput>;
}

/// Adapts a function or closure into a [Step].
pub struct FnStep<F> {
    name: String,
    f: F,
}

impl<F> FnStep<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<RV, V, F> Step<RV, V> for FnStep<F>
where
    RV: UserValuesConstraint,
    V: UserValuesConstraint,
    F: Fn(&mut AgentContext<RV, V>) -> anyhow::Result<StepOutput> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: &mut AgentContext<RV, V>) -> anyhow::Result<StepOutput> {
        (self.f)(ctx)
    }
}

/// A named assertion against a step's output, recorded as a rate.
pub struct Check {
    pub name: String,
    predicate: Box<dyn Fn(&StepOutput) -> bool + Send + Sync>,
}

impl Check {
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn(&StepOutput) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
        }
    }

    pub fn evaluate(&self, output: &StepOutput) -> bool {
        (self.predicate)(output)
    }
}

type Condition<RV, V> = Box<dyn Fn(&AgentContext<RV, V>) -> bool + Send + Sync>;

/// A step together with the checks, think time and metrics that go with it.
pub struct StepDefinition<RV: UserValuesConstraint, V: UserValuesConstraint> {
    pub(crate) step: Arc<dyn Step<RV, V>>,
    pub(crate) checks: Vec<Check>,
    pub(crate) think_time: Option<Duration>,
    pub(crate) trend: Option<String>,
    pub(crate) failure_rate: Option<String>,
    pub(crate) condition: Option<Condition<RV, V>>,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> StepDefinition<RV, V> {
    /// Define a step from a function or closure.
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(&mut AgentContext<RV, V>) -> anyhow::Result<StepOutput> + Send + Sync + 'static,
    ) -> Self {
        Self::from_step(FnStep::new(name, f))
    }

    pub fn from_step(step: impl Step<RV, V> + 'static) -> Self {
        Self {
            step: Arc::new(step),
            checks: Vec::new(),
            think_time: None,
            trend: None,
            failure_rate: None,
            condition: None,
        }
    }

    /// Define a step from a hook-style function. The step succeeds if the function returns `Ok`
    /// and its duration is the time the function took.
    pub fn from_hook(
        name: impl Into<String>,
        hook: fn(&mut AgentContext<RV, V>) -> anyhow::Result<()>,
    ) -> Self {
        Self::new(name, move |ctx| {
            let started = Instant::now();
            hook(ctx)?;
            Ok(StepOutput::success(started.elapsed()))
        })
    }

    pub fn name(&self) -> &str {
        self.step.name()
    }

    /// Add a check that is evaluated against every output of this step.
    pub fn with_check(
        mut self,
        name: impl Into<String>,
        predicate: impl Fn(&StepOutput) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.checks.push(Check::new(name, predicate));
        self
    }

    /// Pause for `think_time` after this step. The pause is cut short if the virtual user is
    /// retired or the run is stopped.
    pub fn with_think_time(mut self, think_time: Duration) -> Self {
        self.think_time = Some(think_time);
        self
    }

    /// Record this step's duration into the named trend instead of `op_duration`.
    pub fn with_trend(mut self, name: impl Into<String>) -> Self {
        self.trend = Some(name.into());
        self
    }

    /// Record into the named rate whether this step failed or any of its checks failed.
    pub fn with_failure_rate(mut self, name: impl Into<String>) -> Self {
        self.failure_rate = Some(name.into());
        self
    }

    /// Only run this step when `condition` holds. A skipped step records nothing and does not
    /// pause.
    pub fn when(
        mut self,
        condition: impl Fn(&AgentContext<RV, V>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.condition = Some(Box::new(condition));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn output_from_response() {
        let created = StepOutput::from_response(TransportResponse {
            status: 201,
            body: Bytes::from_static(br#"{"id":"ORD-7"}"#),
            elapsed: Duration::from_millis(12),
            error: None,
        });
        assert!(created.success);
        assert_eq!(None, created.error);
        assert_eq!(Some(201), created.status());
        assert_eq!(Duration::from_millis(12), created.elapsed);
        assert_eq!(
            Some("ORD-7".to_string()),
            created
                .json::<serde_json::Value>()
                .and_then(|v| v["id"].as_str().map(str::to_string))
        );

        let not_found = StepOutput::from_response(TransportResponse {
            status: 404,
            ..Default::default()
        });
        assert!(!not_found.success);
        assert_eq!(Some("unexpected status 404".to_string()), not_found.error);

        let refused = StepOutput::from_response(TransportResponse {
            error: Some("connection refused".to_string()),
            ..Default::default()
        });
        assert!(!refused.success);
        assert_eq!(Some("connection refused".to_string()), refused.error);
        assert_eq!(Some(0), refused.status());
    }

    #[test]
    fn checks_see_the_step_output() {
        let check = Check::new("status is 201", |output| output.status() == Some(201));

        assert!(!check.evaluate(&StepOutput::success(Duration::ZERO)));
        assert!(check.evaluate(&StepOutput::from_response(TransportResponse {
            status: 201,
            ..Default::default()
        })));
    }
}
