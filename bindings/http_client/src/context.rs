use std::fmt::Debug;
use std::sync::Arc;

use anyhow::Context;
use gale_runner::prelude::UserValuesConstraint;

use crate::client::HttpClient;

/// Scenario values for scenarios that don't need any.
#[derive(Debug, Default)]
pub struct DefaultScenarioValues {}

impl UserValuesConstraint for DefaultScenarioValues {}

/// HTTP specific agent context values.
///
/// Scenarios keep their own per virtual user state in `scenario_values`.
#[derive(Debug, Default)]
pub struct HttpAgentContext<T: UserValuesConstraint = DefaultScenarioValues> {
    pub(crate) client: Option<Arc<HttpClient>>,
    pub scenario_values: T,
}

impl<T: UserValuesConstraint> UserValuesConstraint for HttpAgentContext<T> {}

impl<T: UserValuesConstraint> HttpAgentContext<T> {
    pub fn client(&self) -> anyhow::Result<Arc<HttpClient>> {
        self.client.clone().context(
            "HTTP client is not set, did you forget to call `create_http_client` in your agent setup?",
        )
    }
}
