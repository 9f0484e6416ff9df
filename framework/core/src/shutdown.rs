use std::sync::Arc;
use std::time::Duration;

use futures::future::select_all;
use tokio::sync::watch::{Receiver, Sender};

/// Signals that some unit of work should stop.
///
/// The signal is level triggered. Once [ShutdownHandle::shutdown] has been called, every listener,
/// including ones created afterwards, observes it.
///
/// Handles can be nested with [ShutdownHandle::child]. A child can be shut down on its own, which
/// is how a single virtual user is retired, and it also observes shutdown of every ancestor, which
/// is how stopping the run reaches all virtual users.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<Sender<bool>>,
    inherited: Vec<Receiver<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            sender: Arc::new(tokio::sync::watch::channel(false).0),
            inherited: Vec::new(),
        }
    }

    pub fn shutdown(&self) {
        if !self.sender.send_replace(true) {
            log::trace!("Shutdown signal sent");
        }
    }

    /// Whether this handle, or any handle it was derived from, has been shut down.
    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow() || self.inherited.iter().any(|r| *r.borrow())
    }

    /// Create a handle that can be shut down independently and that also follows this one.
    pub fn child(&self) -> ShutdownHandle {
        let mut inherited = self.inherited.clone();
        inherited.push(self.sender.subscribe());

        ShutdownHandle {
            sender: Arc::new(tokio::sync::watch::channel(false).0),
            inherited,
        }
    }

    pub fn new_listener(&self) -> DelegatedShutdownListener {
        let mut receivers = self.inherited.clone();
        receivers.push(self.sender.subscribe());

        DelegatedShutdownListener::new(receivers)
    }
}

#[derive(Clone, Debug)]
pub struct DelegatedShutdownListener {
    receivers: Vec<Receiver<bool>>,
}

impl DelegatedShutdownListener {
    pub(crate) fn new(receivers: Vec<Receiver<bool>>) -> Self {
        Self { receivers }
    }

    /// Point in time check if the shutdown signal has been received. If this returns true then work
    /// should be stopped so that the virtual user or the run can wind down.
    ///
    /// A dropped [ShutdownHandle] counts as a shutdown signal.
    pub fn should_shutdown(&self) -> bool {
        self.receivers
            .iter()
            .any(|r| *r.borrow() || r.has_changed().is_err())
    }

    /// Wait for the shutdown signal to be received. It is safe to race this with another future
    /// so that the shutdown signal can be used to cancel other work in progress.
    pub async fn wait_for_shutdown(&mut self) {
        if self.receivers.is_empty() {
            return futures::future::pending().await;
        }

        let waits = self.receivers.iter_mut().map(|receiver| {
            Box::pin(async move {
                // An error means the sender is gone, which is treated the same as a signal.
                let _ = receiver.wait_for(|stop| *stop).await.is_ok();
            })
        });

        select_all(waits).await;
    }

    /// Cooperative delay. Sleeps for `duration` unless the shutdown signal arrives first.
    ///
    /// Returns `true` if the full pause elapsed and `false` if it was cut short.
    pub async fn pause(&mut self, duration: Duration) -> bool {
        if self.should_shutdown() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wait_for_shutdown() => false,
        }
    }
}

#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct ShutdownSignalError {
    msg: String,
}

impl Default for ShutdownSignalError {
    fn default() -> Self {
        Self {
            msg: "Execution cancelled by shutdown signal".to_string(),
        }
    }
}
