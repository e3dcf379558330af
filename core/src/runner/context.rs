use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::BatchError;

/// Cancellation view over a runner's stop signal.
///
/// Handed to sinks so in-flight delivery can be abandoned as soon as the
/// runner is stopped. It carries no deadline: the only way it completes is a
/// call to `RunnerState::stop`.
#[derive(Debug, Clone)]
pub struct RunnerContext {
    token: CancellationToken,
}

impl RunnerContext {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the runner is asked to stop.
    pub async fn done(&self) {
        self.token.cancelled().await
    }

    /// `Some(RunnerStopped)` once stopped, `None` while running.
    pub fn err(&self) -> Option<BatchError> {
        self.is_stopped().then_some(BatchError::RunnerStopped)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Drives `fut` until it completes or the runner stops, whichever comes first.
    /// A stop that is already pending wins without polling `fut`.
    pub async fn run_until_stopped<F>(&self, fut: F) -> Result<F::Output, BatchError>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(BatchError::RunnerStopped),
            output = fut => Ok(output),
        }
    }

    /// Interruptible delay; returns early when the runner stops.
    pub async fn sleep(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.token.cancelled() => {}
        }
    }
}
