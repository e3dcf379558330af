mod context;
mod state;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info};

use crate::batch::Batch;
use crate::config::BatcherConfig;
use crate::errors::{BatchError, Result};
use crate::record::IntoRecord;
use crate::sink::Sink;
use crate::telemetry::BatcherMetrics;

pub use context::RunnerContext;
pub use state::RunnerState;

/// Hard upper bound on the number of records handed to a sink in one call.
pub const MAX_DELIVERY_RECORDS: usize = 500;
pub const DEFAULT_THRESHOLD: usize = 250;
pub const DEFAULT_MAX_BATCH_AGE: Duration = Duration::from_secs(60);

// pause between empty pops while draining
const DRAIN_IDLE_POLL: Duration = Duration::from_millis(10);

/// Background loop that flushes a [`Batch`] into a [`Sink`].
///
/// The loop wakes on the first of: the max batch age elapsing, the batch
/// reaching its threshold, a drain request, or a stop. It then pops at most
/// `max_delivery_size` records and hands them to the sink, waiting for the sink
/// to return before the next pass. Sub-batches are therefore delivered in FIFO
/// order and never overlap.
///
/// [`BatchRunner::run`] must be driven on its own task. Records still in the
/// batch when the loop stops are left there.
pub struct BatchRunner<S> {
    max_batch_age: Duration,
    max_delivery_size: usize,
    batch: Batch,
    sink: S,
    state: RunnerState,
    metrics: Arc<BatcherMetrics>,
    running: AtomicBool,
    in_flight: AtomicBool,
}

impl<S: Sink> BatchRunner<S> {
    pub fn new(sink: S) -> Self {
        Self {
            max_batch_age: DEFAULT_MAX_BATCH_AGE,
            max_delivery_size: MAX_DELIVERY_RECORDS,
            batch: Batch::new(DEFAULT_THRESHOLD),
            sink,
            state: RunnerState::new(),
            metrics: Arc::new(BatcherMetrics::default()),
            running: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &BatcherConfig, sink: S) -> Self {
        Self::new(sink)
            .with_threshold(config.threshold)
            .with_max_batch_age(config.max_batch_age())
            .with_max_delivery_size(config.max_delivery_size)
    }

    /// Replaces the accumulator. Must be called before any record is added.
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.batch = Batch::new(threshold);
        self
    }

    pub fn with_max_batch_age(mut self, max_batch_age: Duration) -> Self {
        self.max_batch_age = max_batch_age;
        self
    }

    /// Clamped to `1..=MAX_DELIVERY_RECORDS`.
    pub fn with_max_delivery_size(mut self, max_delivery_size: usize) -> Self {
        self.max_delivery_size = max_delivery_size.clamp(1, MAX_DELIVERY_RECORDS);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<BatcherMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn add<R: IntoRecord>(&self, item: R) -> Result<()> {
        self.batch
            .add(item)
            .inspect(|_| self.metrics.record_added())
            .inspect_err(|_| self.metrics.record_rejected())
    }

    pub fn current_batch_size(&self) -> usize {
        self.batch.current_size()
    }

    /// Runs the flush loop until [`BatchRunner::stop`] is called, then marks
    /// the runner done. Fails with [`BatchError::AlreadyRunning`] when the loop
    /// is already being driven elsewhere.
    pub async fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(BatchError::AlreadyRunning);
        }

        info!(
            threshold = self.batch.threshold(),
            max_batch_age = ?self.max_batch_age,
            max_delivery_size = self.max_delivery_size,
            "batch runner started"
        );

        let ctx = self.state.context();
        while !self.state.stopped() {
            self.wait_for_work(&ctx).await;
            if self.state.stopped() {
                break;
            }

            self.in_flight.store(true, Ordering::SeqCst);
            let batch = self.batch.pop_batch(self.max_delivery_size);
            if batch.is_empty() {
                self.in_flight.store(false, Ordering::SeqCst);
                if self.state.is_draining() {
                    ctx.sleep(DRAIN_IDLE_POLL).await;
                }
                continue;
            }

            self.metrics.sub_batch_flushed();
            debug!(
                size = batch.len(),
                remaining = self.batch.current_size(),
                "flushing sub-batch"
            );
            self.sink.process(&ctx, batch).await;
            self.in_flight.store(false, Ordering::SeqCst);
        }

        self.state.mark_done();
        info!(
            pending = self.batch.current_size(),
            "batch runner stopped"
        );
        Ok(())
    }

    async fn wait_for_work(&self, ctx: &RunnerContext) {
        if self.state.is_draining() {
            return;
        }

        let breach = self.batch.threshold_breach();
        tokio::select! {
            _ = ctx.done() => {}
            _ = tokio::time::sleep(self.max_batch_age) => {
                debug!("max batch age elapsed");
            }
            _ = breach.notified() => {
                self.batch.mark_threshold_breach_read();
                debug!("batch threshold breached");
            }
            _ = self.state.draining() => {}
        }
    }

    /// Switches the loop to flushing continuously. Does not stop it.
    pub fn drain(&self) {
        self.state.drain();
    }

    /// Requests a stop and waits up to `timeout` for the loop to exit.
    pub async fn stop(&self, timeout: Duration) -> bool {
        self.state.stop();
        self.state.wait(timeout).await
    }

    /// True when nothing is pending and no sub-batch is being delivered.
    pub fn is_idle(&self) -> bool {
        self.batch.current_size() == 0 && !self.in_flight.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> &RunnerState {
        &self.state
    }

    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    pub fn metrics(&self) -> &Arc<BatcherMetrics> {
        &self.metrics
    }

    pub fn max_batch_age(&self) -> Duration {
        self.max_batch_age
    }

    pub fn max_delivery_size(&self) -> usize {
        self.max_delivery_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ValidationError;
    use crate::record::Record;
    use async_trait::async_trait;
    use tokio::sync::{Notify, mpsc};
    use tokio::time::{Instant, timeout};

    struct ChannelSink(mpsc::UnboundedSender<Vec<String>>);

    #[async_trait]
    impl Sink for ChannelSink {
        async fn process(&self, _ctx: &RunnerContext, batch: Vec<Record>) {
            let _ = self.0.send(batch.into_iter().map(|r| r.key).collect());
        }
    }

    /// Holds every call until released, ignoring the stop signal.
    struct GatedSink {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Sink for GatedSink {
        async fn process(&self, _ctx: &RunnerContext, _batch: Vec<Record>) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }

    fn channel_runner() -> (Arc<BatchRunner<ChannelSink>>, mpsc::UnboundedReceiver<Vec<String>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = BatchRunner::new(ChannelSink(tx)).with_max_batch_age(Duration::from_secs(3600));
        (Arc::new(runner), rx)
    }

    fn spawn_run<S: Sink + 'static>(runner: &Arc<BatchRunner<S>>) -> tokio::task::JoinHandle<Result<()>> {
        let runner = runner.clone();
        tokio::spawn(async move { runner.run().await })
    }

    fn record(key: impl Into<String>) -> Record {
        Record::new(key, b"payload".to_vec())
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_breach_triggers_flush() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = Arc::new(
            BatchRunner::new(ChannelSink(tx))
                .with_threshold(3)
                .with_max_batch_age(Duration::from_secs(3600)),
        );
        let handle = spawn_run(&runner);

        for key in ["a", "b", "c"] {
            runner.add(record(key)).unwrap();
        }

        let flushed = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(flushed, vec!["a", "b", "c"]);
        assert_eq!(runner.current_batch_size(), 0);

        assert!(runner.stop(Duration::from_secs(1)).await);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_batch_age_triggers_flush() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = Arc::new(
            BatchRunner::new(ChannelSink(tx))
                .with_threshold(100)
                .with_max_batch_age(Duration::from_millis(50)),
        );
        let start = Instant::now();
        let handle = spawn_run(&runner);

        runner.add(record("a")).unwrap();

        let flushed = rx.recv().await.unwrap();
        assert_eq!(flushed, vec!["a"]);
        assert!(start.elapsed() >= Duration::from_millis(50));

        assert!(runner.stop(Duration::from_secs(1)).await);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_batches_are_bounded_and_ordered() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = Arc::new(
            BatchRunner::new(ChannelSink(tx))
                .with_threshold(10)
                .with_max_delivery_size(10),
        );
        for i in 0..25 {
            runner.add(record(format!("k{i:02}"))).unwrap();
        }
        runner.drain();
        let handle = spawn_run(&runner);

        let mut sizes = Vec::new();
        let mut keys = Vec::new();
        while keys.len() < 25 {
            let flushed = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
            sizes.push(flushed.len());
            keys.extend(flushed);
        }

        assert_eq!(sizes, vec![10, 10, 5]);
        let expected: Vec<String> = (0..25).map(|i| format!("k{i:02}")).collect();
        assert_eq!(keys, expected);

        assert!(runner.stop(Duration::from_secs(1)).await);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_then_add_flushes_without_waiting_for_age() {
        let (runner, mut rx) = channel_runner();
        let handle = spawn_run(&runner);
        tokio::task::yield_now().await;

        let start = Instant::now();
        runner.drain();
        runner.add(record("a")).unwrap();
        runner.add(record("b")).unwrap();

        let mut keys = Vec::new();
        while keys.len() < 2 {
            keys.extend(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap());
        }
        assert_eq!(keys, vec!["a", "b"]);
        assert!(start.elapsed() < runner.max_batch_age());

        assert!(runner.stop(Duration::from_secs(1)).await);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_times_out_while_sink_is_busy() {
        let sink = Arc::new(GatedSink {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let runner = Arc::new(BatchRunner::new(sink.clone()).with_threshold(1));
        let handle = spawn_run(&runner);

        runner.add(record("a")).unwrap();
        sink.entered.notified().await;

        assert!(!runner.stop(Duration::ZERO).await);
        assert!(runner.state().stopped());

        sink.release.notify_one();
        assert!(runner.stop(Duration::from_secs(1)).await);
        assert!(runner.stop(Duration::ZERO).await);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_idle_runner() {
        let (runner, _rx) = channel_runner();
        let handle = spawn_run(&runner);
        tokio::task::yield_now().await;

        assert!(runner.stop(Duration::from_secs(1)).await);
        handle.await.unwrap().unwrap();
        assert!(runner.state().is_done());
    }

    #[tokio::test]
    async fn test_stop_without_run_is_not_done() {
        let (runner, _rx) = channel_runner();
        assert!(!runner.stop(Duration::ZERO).await);
    }

    #[tokio::test]
    async fn test_records_left_pending_on_stop() {
        let (runner, mut rx) = channel_runner();
        let handle = spawn_run(&runner);

        runner.add(record("a")).unwrap();
        assert!(runner.stop(Duration::from_secs(1)).await);
        handle.await.unwrap().unwrap();

        assert_eq!(runner.current_batch_size(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_run_is_not_reentrant() {
        let (runner, _rx) = channel_runner();
        let handle = spawn_run(&runner);
        tokio::task::yield_now().await;

        assert!(matches!(runner.run().await, Err(BatchError::AlreadyRunning)));

        assert!(runner.stop(Duration::from_secs(1)).await);
        handle.await.unwrap().unwrap();
    }

    #[test]
    fn test_add_rejects_invalid_record() {
        let (runner, _rx) = channel_runner();

        let err = runner.add(record("")).unwrap_err();
        assert!(matches!(err, BatchError::Validation(ValidationError::EmptyKey)));
        assert_eq!(runner.current_batch_size(), 0);
        assert!(runner.batch().threshold_breach().is_armed());

        let snapshot = runner.metrics().snapshot();
        assert_eq!(snapshot.records_rejected, 1);
        assert_eq!(snapshot.records_added, 0);
    }

    #[test]
    fn test_max_delivery_size_is_clamped() {
        let (runner, _rx) = channel_runner();
        assert_eq!(runner.max_delivery_size(), MAX_DELIVERY_RECORDS);

        let (tx, _rx) = mpsc::unbounded_channel();
        let runner = BatchRunner::new(ChannelSink(tx)).with_max_delivery_size(10_000);
        assert_eq!(runner.max_delivery_size(), MAX_DELIVERY_RECORDS);

        let (tx, _rx) = mpsc::unbounded_channel();
        let runner = BatchRunner::new(ChannelSink(tx)).with_max_delivery_size(0);
        assert_eq!(runner.max_delivery_size(), 1);
    }
}
