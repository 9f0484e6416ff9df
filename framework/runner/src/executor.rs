use std::future::Future;

use gale_core::prelude::{ShutdownHandle, ShutdownSignalError};

#[derive(Debug)]
pub struct Executor {
    runtime: tokio::runtime::Runtime,
    abort_handle: ShutdownHandle,
}

impl Executor {
    pub(crate) fn new(runtime: tokio::runtime::Runtime, abort_handle: ShutdownHandle) -> Self {
        Self {
            runtime,
            abort_handle,
        }
    }

    /// Run async code in place, blocking until it completes.
    ///
    /// Stopping the run does not cancel the future, an in-flight request is allowed to finish.
    /// The future is only cancelled once the grace period after a stop has run out and the run
    /// abandons its virtual users. In that case the result is a [ShutdownSignalError].
    pub fn execute_in_place<T>(
        &self,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        let mut abort_listener = self.abort_handle.new_listener();
        self.runtime.block_on(async move {
            tokio::select! {
                result = fut => result,
                _ = abort_listener.wait_for_shutdown() => {
                    Err(anyhow::anyhow!(ShutdownSignalError::default()))
                },
            }
        })
    }

    /// Submit async code to be run in the background.
    ///
    /// Note that the future will not be cancelled if the runner is shutdown. It is also not guaranteed
    /// that the runner will wait for the future to complete before shutting down.
    ///
    /// In steps, you should use [Executor::execute_in_place] instead of [Executor::spawn] so
    /// that your future completes before the step is recorded.
    pub fn spawn(&self, fut: impl Future<Output = ()> + Send + 'static) {
        self.runtime.spawn(fut);
    }
}
