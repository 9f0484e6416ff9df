mod client;
mod common;
mod context;
mod runner_context;

pub mod prelude {
    pub use super::{
        client::{
            HttpClient, HTTP_REQS_METRIC, HTTP_REQ_DURATION_METRIC, HTTP_REQ_FAILED_METRIC,
        },
        common::{
            create_http_client, get, post_json, send, HttpContext, HttpScenarioDefinitionBuilder,
        },
        context::{DefaultScenarioValues, HttpAgentContext},
        runner_context::HttpRunnerContext,
    };

    pub use gale_runner::prelude::*;
}
