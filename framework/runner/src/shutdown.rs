use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gale_core::prelude::ShutdownHandle;
use tokio::signal;

/// Stop the run gracefully on Ctrl-C.
///
/// The returned flag is set once the signal has been received, so that the run can report that it
/// was interrupted rather than stopped by the scenario.
pub(crate) fn start_shutdown_listener(
    runtime: &tokio::runtime::Runtime,
    stop_handle: ShutdownHandle,
) -> Arc<AtomicBool> {
    let interrupted = Arc::new(AtomicBool::new(false));

    let flag = interrupted.clone();
    runtime.spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                flag.store(true, Ordering::SeqCst);
                stop_handle.shutdown();
                println!("Received shutdown signal, stopping the run...");
            }
            Err(e) => {
                log::error!("Failed to listen for the shutdown signal: {e}");
            }
        }
    });

    interrupted
}
