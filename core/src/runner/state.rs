use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::context::RunnerContext;

/// Stop / drain / done bookkeeping for a background loop that may only be
/// stopped once.
///
/// `stop` and `mark_done` are one-shot: only the first call transitions the
/// state and notifies, later calls are no-ops. Completion is broadcast, so any
/// number of callers may [`RunnerState::wait`] on it.
#[derive(Debug)]
pub struct RunnerState {
    stopped: AtomicBool,
    stop: CancellationToken,

    // tells the runner to stop waiting on timers and threshold breaches
    drain: CancellationToken,

    done: watch::Sender<bool>,
}

impl RunnerState {
    pub fn new() -> Self {
        let (done, _) = watch::channel(false);
        Self {
            stopped: AtomicBool::new(false),
            stop: CancellationToken::new(),
            drain: CancellationToken::new(),
            done,
        }
    }

    pub fn drain(&self) {
        if !self.drain.is_cancelled() {
            debug!("runner drain requested");
        }
        self.drain.cancel();
    }

    pub fn is_draining(&self) -> bool {
        self.drain.is_cancelled()
    }

    /// Resolves once [`RunnerState::drain`] has been called.
    pub async fn draining(&self) {
        self.drain.cancelled().await
    }

    /// Requests a stop. Returns true only for the call that performed the transition.
    pub fn stop(&self) -> bool {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.stop.cancel();
        debug!("runner stop requested");
        true
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Called by the runner once its loop has exited.
    /// Returns true only for the call that performed the transition.
    pub fn mark_done(&self) -> bool {
        let transitioned = self.done.send_if_modified(|done| {
            if *done {
                return false;
            }
            *done = true;
            true
        });
        if transitioned {
            debug!("runner marked done");
        }
        transitioned
    }

    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Waits up to `timeout` for the runner to report done.
    pub async fn wait(&self, timeout: Duration) -> bool {
        if self.is_done() {
            return true;
        }

        let mut done = self.done.subscribe();
        match tokio::time::timeout(timeout, done.wait_for(|done| *done)).await {
            Ok(Ok(_)) => true,
            _ => self.is_done(),
        }
    }

    pub fn context(&self) -> RunnerContext {
        RunnerContext::new(self.stop.clone())
    }

    /// Sleeps for `duration`, returning early if a stop is requested.
    pub async fn sleep(&self, duration: Duration) {
        self.context().sleep(duration).await
    }
}

impl Default for RunnerState {
    fn default() -> Self {
        Self::new()
    }
}
