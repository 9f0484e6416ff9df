use gale_runner::prelude::UserValuesConstraint;

/// HTTP specific runner context values.
#[derive(Debug, Default)]
pub struct HttpRunnerContext;

impl UserValuesConstraint for HttpRunnerContext {}
