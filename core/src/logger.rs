use crate::errors::BatchError;

/// Receives background delivery errors. Implementations must not block or panic.
#[cfg_attr(test, mockall::automock)]
pub trait ErrorLogger: Send + Sync {
    fn error(&self, err: &BatchError);
}

/// Discards every error. The default when no logger is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopLogger;

impl ErrorLogger for NopLogger {
    fn error(&self, _err: &BatchError) {}
}

/// Forwards errors to `tracing` at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl ErrorLogger for TracingLogger {
    fn error(&self, err: &BatchError) {
        tracing::error!(error = %err, retryable = err.is_retryable(), "batch delivery error");
    }
}
