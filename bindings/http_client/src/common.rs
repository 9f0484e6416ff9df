use std::sync::Arc;

use gale_runner::prelude::{
    AgentContext, HookResult, ScenarioDefinitionBuilder, StepOutput, TransportRequest,
    UserValuesConstraint,
};
use serde::Serialize;

use crate::client::HttpClient;
use crate::context::{DefaultScenarioValues, HttpAgentContext};
use crate::runner_context::HttpRunnerContext;

/// The agent context seen by steps in an HTTP scenario.
pub type HttpContext<T = DefaultScenarioValues> =
    AgentContext<HttpRunnerContext, HttpAgentContext<T>>;

/// The scenario builder for an HTTP scenario.
pub type HttpScenarioDefinitionBuilder<T = DefaultScenarioValues> =
    ScenarioDefinitionBuilder<HttpRunnerContext, HttpAgentContext<T>>;

/// Create the HTTP client for a virtual user. Relative URLs are resolved against the connection
/// string.
///
/// Use this as the agent setup hook, or call it from your own.
pub fn create_http_client<T: UserValuesConstraint>(ctx: &mut HttpContext<T>) -> HookResult {
    let base_url = ctx
        .runner_context()
        .get_connection_string()
        .map(str::to_string);
    if base_url.is_none() {
        log::debug!("No connection string for VU {}, only absolute URLs will work", ctx.vu_id());
    }

    let client = HttpClient::new(ctx.registry(), base_url)?;
    ctx.get_mut().client = Some(Arc::new(client));

    Ok(())
}

/// Execute a request with the virtual user's client and turn the response into a step output.
pub fn send<T: UserValuesConstraint>(
    ctx: &mut HttpContext<T>,
    request: TransportRequest,
) -> anyhow::Result<StepOutput> {
    let client = ctx.get().client()?;
    let response = ctx.execute(client.as_ref(), request)?;

    Ok(StepOutput::from_response(response))
}

pub fn get<T: UserValuesConstraint>(
    ctx: &mut HttpContext<T>,
    url: &str,
) -> anyhow::Result<StepOutput> {
    send(ctx, TransportRequest::get(url))
}

pub fn post_json<T: UserValuesConstraint, B: Serialize>(
    ctx: &mut HttpContext<T>,
    url: &str,
    body: &B,
) -> anyhow::Result<StepOutput> {
    send(ctx, TransportRequest::post(url).with_json(body)?)
}
