use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::BatcherConfig;
use crate::errors::{ConfigError, Result};
use crate::logger::ErrorLogger;
use crate::record::IntoRecord;
use crate::runner::BatchRunner;
use crate::sink::{PutRecordsClient, RetryingSink, Sink, build_client, put_record};
use crate::telemetry::{BatcherMetrics, MetricsSnapshot};

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

// share of the close timeout kept back for the stop phase
const STOP_RESERVE_DIVISOR: u32 = 10;
const MAX_STOP_RESERVE: Duration = Duration::from_millis(500);

/// Owns a [`BatchRunner`] and the task driving it.
///
/// Records go either through the batch ([`Batcher::add`]) or, when a client is
/// attached, straight to the downstream ([`Batcher::put`]).
pub struct Batcher<S> {
    runner: Arc<BatchRunner<S>>,
    client: Option<Arc<dyn PutRecordsClient>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Batcher<Box<dyn Sink>> {
    /// Builds the configured client, the retrying sink over it, and a runner
    /// sharing one set of metrics. Direct puts use the same client.
    pub fn from_config(config: &BatcherConfig, logger: Arc<dyn ErrorLogger>) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(BatcherMetrics::default());
        let client = build_client(&config.sink)?;
        let sink: Box<dyn Sink> = Box::new(
            RetryingSink::new(client.clone())
                .with_logger(logger)
                .with_metrics(metrics.clone()),
        );
        Ok(Self::new(BatchRunner::from_config(config, sink).with_metrics(metrics)).with_client(client))
    }
}

impl<S: Sink + 'static> Batcher<S> {
    pub fn new(runner: BatchRunner<S>) -> Self {
        Self {
            runner: Arc::new(runner),
            client: None,
            handle: Mutex::new(None),
        }
    }

    /// Attaches the client used by [`Batcher::put`].
    pub fn with_client(mut self, client: Arc<dyn PutRecordsClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Spawns the runner loop on the current tokio runtime. Later calls are no-ops.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }

        let runner = self.runner.clone();
        *handle = Some(tokio::spawn(async move {
            if let Err(err) = runner.run().await {
                warn!(error = %err, "batch runner exited");
            }
        }));
    }

    /// Drives the runner loop on the caller's task until stopped.
    pub async fn run(&self) -> Result<()> {
        self.runner.run().await
    }

    pub fn add<R: IntoRecord>(&self, item: R) -> Result<()> {
        self.runner.add(item)
    }

    /// Sends one record immediately, without batching or retries, and returns
    /// the downstream's verdict.
    pub async fn put<R: IntoRecord>(&self, item: R) -> Result<()> {
        let client = self.client.as_ref().ok_or_else(|| ConfigError::Invalid {
            message: "no delivery client attached for direct puts".to_string(),
        })?;
        put_record(client.as_ref(), item).await
    }

    pub fn current_batch_size(&self) -> usize {
        self.runner.current_batch_size()
    }

    pub fn drain(&self) {
        self.runner.drain();
    }

    pub async fn stop(&self, timeout: Duration) -> bool {
        self.runner.stop(timeout).await
    }

    /// Drains, waits for pending records to be delivered, then stops. The whole
    /// sequence is bounded by `timeout`, part of which is always left for the
    /// stop itself. Returns whether the loop exited in time.
    pub async fn close(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let reserve = (timeout / STOP_RESERVE_DIVISOR).min(MAX_STOP_RESERVE);
        let idle_deadline = deadline - reserve;
        self.drain();

        while !self.runner.is_idle() && Instant::now() < idle_deadline {
            let remaining = idle_deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(IDLE_POLL_INTERVAL.min(remaining)).await;
        }

        let pending = self.current_batch_size();
        if pending > 0 {
            warn!(pending, "closing with records still pending");
        }

        let stopped = self.stop(deadline.saturating_duration_since(Instant::now())).await;
        if stopped {
            self.handle.lock().take();
        }
        info!(stopped, "batcher closed");
        stopped
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.runner.metrics().snapshot()
    }

    pub fn runner(&self) -> &Arc<BatchRunner<S>> {
        &self.runner
    }
}
