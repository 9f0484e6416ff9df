use std::thread::JoinHandle;

use anyhow::Context;
use gale_core::prelude::ShutdownHandle;

use crate::vu::VuExit;

/// Starts the thread for a new virtual user, given its id and its retirement handle.
pub(crate) type SpawnVu =
    Box<dyn FnMut(usize, &ShutdownHandle) -> std::io::Result<JoinHandle<VuExit>>>;

struct RunningVu {
    id: usize,
    retire_handle: ShutdownHandle,
    thread: JoinHandle<VuExit>,
}

impl RunningVu {
    fn join(self) -> VuExit {
        match self.thread.join() {
            Ok(exit) => exit,
            Err(_) => {
                log::error!("VU {} thread panicked", self.id);
                VuExit::Abandoned
            }
        }
    }
}

/// The set of virtual users in a run.
///
/// The pool is driven by the scheduler loop. On every tick it is reconciled against the desired
/// concurrency: missing virtual users are started and surplus ones are retired. A retired virtual
/// user finishes its current iteration before its thread exits, until then it still counts as
/// running.
pub(crate) struct VuPool {
    spawn: SpawnVu,
    stop_handle: ShutdownHandle,
    next_id: usize,
    active: Vec<RunningVu>,
    retiring: Vec<RunningVu>,
    /// Virtual users that ran all of their iterations. They hold their slot so that they are not
    /// replaced.
    exhausted: usize,
    peak: usize,
}

impl VuPool {
    pub(crate) fn new(stop_handle: ShutdownHandle, spawn: SpawnVu) -> Self {
        Self {
            spawn,
            stop_handle,
            next_id: 0,
            active: Vec::new(),
            retiring: Vec::new(),
            exhausted: 0,
            peak: 0,
        }
    }

    /// Start or retire virtual users so that the pool matches `desired`.
    ///
    /// Virtual users that have exited on their own, because they bailed or their setup failed, no
    /// longer count towards the pool and are replaced.
    pub(crate) fn reconcile(&mut self, desired: usize) -> anyhow::Result<()> {
        self.reap();

        let actual = self.active.len() + self.exhausted;
        if actual < desired {
            for _ in actual..desired {
                self.start()?;
            }
        } else if actual > desired {
            let mut surplus = actual - desired;

            let freed = surplus.min(self.exhausted);
            self.exhausted -= freed;
            surplus -= freed;

            for _ in 0..surplus {
                self.retire_newest();
            }
        }

        self.peak = self.peak.max(self.running());
        Ok(())
    }

    /// Retire every virtual user. Used once the ramp profile has ended or the run was stopped.
    pub(crate) fn retire_all(&mut self) {
        self.exhausted = 0;
        while !self.active.is_empty() {
            self.retire_newest();
        }
    }

    /// Virtual users whose threads are still running, including ones that have been retired.
    pub(crate) fn running(&self) -> usize {
        self.active.len() + self.retiring.len()
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak
    }

    /// True once every virtual user thread has exited.
    pub(crate) fn is_drained(&mut self) -> bool {
        self.reap();
        self.running() == 0
    }

    /// Give up on virtual users that have not exited. Their threads are detached.
    ///
    /// Returns the number of virtual users that were abandoned.
    pub(crate) fn abandon(&mut self) -> usize {
        self.reap();

        let abandoned = self.active.len() + self.retiring.len();
        for vu in self.active.drain(..).chain(self.retiring.drain(..)) {
            log::warn!("Abandoning VU {}", vu.id);
        }

        abandoned
    }

    fn start(&mut self) -> anyhow::Result<()> {
        let id = self.next_id;
        self.next_id += 1;

        let retire_handle = self.stop_handle.child();
        let thread = (self.spawn)(id, &retire_handle)
            .with_context(|| format!("Failed to spawn thread for VU {id}"))?;

        self.active.push(RunningVu {
            id,
            retire_handle,
            thread,
        });

        Ok(())
    }

    fn retire_newest(&mut self) {
        if let Some(vu) = self.active.pop() {
            log::debug!("Retiring VU {}", vu.id);
            vu.retire_handle.shutdown();
            self.retiring.push(vu);
        }
    }

    /// Join the threads of virtual users that have exited.
    fn reap(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) = self
            .active
            .drain(..)
            .partition(|vu| vu.thread.is_finished());
        self.active = running;

        for vu in finished {
            if vu.join() == VuExit::Exhausted {
                self.exhausted += 1;
            }
        }

        let (finished, retiring): (Vec<_>, Vec<_>) = self
            .retiring
            .drain(..)
            .partition(|vu| vu.thread.is_finished());
        self.retiring = retiring;

        for vu in finished {
            vu.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// Virtual users that wait until they are retired.
    fn waiting_pool(stop_handle: ShutdownHandle, started: Arc<AtomicUsize>) -> VuPool {
        VuPool::new(
            stop_handle,
            Box::new(move |_: usize, retire_handle: &ShutdownHandle| {
                started.fetch_add(1, Ordering::SeqCst);
                let listener = retire_handle.new_listener();
                std::thread::Builder::new().spawn(move || {
                    while !listener.should_shutdown() {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    VuExit::Retired
                })
            }),
        )
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn reconcile_starts_and_retires() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut pool = waiting_pool(ShutdownHandle::new(), started.clone());

        pool.reconcile(5).unwrap();
        assert_eq!(5, pool.running());
        assert_eq!(5, started.load(Ordering::SeqCst));

        pool.reconcile(2).unwrap();
        wait_until(|| {
            pool.reconcile(2).unwrap();
            pool.running() == 2
        });
        assert_eq!(5, started.load(Ordering::SeqCst));
        assert_eq!(5, pool.peak());

        pool.retire_all();
        wait_until(|| pool.is_drained());
    }

    #[test]
    fn zero_desired_starts_nothing() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut pool = waiting_pool(ShutdownHandle::new(), started.clone());

        pool.reconcile(0).unwrap();
        assert_eq!(0, started.load(Ordering::SeqCst));
        assert!(pool.is_drained());
    }

    #[test]
    fn stopping_the_run_reaches_every_vu() {
        let stop_handle = ShutdownHandle::new();
        let mut pool = waiting_pool(stop_handle.clone(), Arc::new(AtomicUsize::new(0)));

        pool.reconcile(3).unwrap();
        stop_handle.shutdown();

        wait_until(|| pool.is_drained());
    }

    #[test]
    fn vus_that_exit_early_are_replaced_unless_exhausted() {
        let started = Arc::new(AtomicUsize::new(0));
        let exit = Arc::new(parking_lot::Mutex::new(VuExit::Bailed));

        let mut pool = {
            let started = started.clone();
            let exit = exit.clone();
            VuPool::new(
                ShutdownHandle::new(),
                Box::new(move |_: usize, _: &ShutdownHandle| {
                    started.fetch_add(1, Ordering::SeqCst);
                    let exit = *exit.lock();
                    std::thread::Builder::new().spawn(move || exit)
                }),
            )
        };

        pool.reconcile(1).unwrap();
        wait_until(|| {
            pool.reconcile(1).unwrap();
            started.load(Ordering::SeqCst) >= 3
        });

        *exit.lock() = VuExit::Exhausted;
        wait_until(|| pool.is_drained());
        let before = started.load(Ordering::SeqCst);
        // The next VU to start is exhausted straight away and then holds its slot.
        pool.reconcile(1).unwrap();
        wait_until(|| pool.is_drained());
        pool.reconcile(1).unwrap();
        pool.reconcile(1).unwrap();
        assert_eq!(before + 1, started.load(Ordering::SeqCst));
    }
}
