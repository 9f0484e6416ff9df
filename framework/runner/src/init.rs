use crate::cli::GaleScenarioCli;
use clap::Parser;

/// Initialise the CLI and logging for the Gale runner.
///
/// Logging is configured with the `RUST_LOG` environment variable. Calling this more than once
/// keeps the logger from the first call.
pub fn init() -> GaleScenarioCli {
    init_logging();

    GaleScenarioCli::parse()
}

pub(crate) fn init_logging() {
    let _ = env_logger::try_init();
}
