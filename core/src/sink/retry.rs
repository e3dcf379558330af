use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::errors::{BatchError, DeliveryError, ValidationError};
use crate::logger::{ErrorLogger, NopLogger};
use crate::record::Record;
use crate::runner::RunnerContext;
use crate::sink::{PutRecordsClient, PutRecordsOutput, RecordOutcome, Sink};
use crate::telemetry::BatcherMetrics;

/// Delivers sub-batches through a [`PutRecordsClient`], retrying until every
/// record is accepted or the runner stops.
///
/// - A failed call is retried with the same records, after a linear backoff
///   when the failure was a rate limit and immediately otherwise.
/// - A response with one outcome per record narrows the next attempt to the
///   records that failed.
/// - A response whose shape does not match the request is not trusted: the
///   whole set is sent again.
///
/// Records still undelivered when the runner stops are dropped. Delivery is
/// best effort across shutdown.
pub struct RetryingSink<C> {
    client: C,
    logger: Arc<dyn ErrorLogger>,
    metrics: Arc<BatcherMetrics>,
}

impl<C: PutRecordsClient> RetryingSink<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            logger: Arc::new(NopLogger),
            metrics: Arc::new(BatcherMetrics::default()),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn ErrorLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<BatcherMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    async fn send_batch(&self, ctx: &RunnerContext, mut batch: Vec<Record>) {
        let mut throttled_attempts: u32 = 0;

        while !batch.is_empty() && !ctx.is_stopped() {
            self.metrics.delivery_attempt();

            let output = match ctx.run_until_stopped(self.client.put_records(&batch)).await {
                Ok(output) => output,
                Err(_) => break,
            };

            let output = match output {
                Ok(output) => output,
                Err(err) => {
                    if err.is_rate_limited() {
                        throttled_attempts += 1;
                        self.metrics.throttled_attempt();
                        let delay = err.kind().backoff(throttled_attempts);
                        warn!(attempt = throttled_attempts, ?delay, "downstream throttled, backing off");
                        self.logger.error(&err.into());
                        ctx.sleep(delay).await;
                    } else {
                        self.logger.error(&err.into());
                        // immediate retry, but give the stop signal a chance to run
                        tokio::task::yield_now().await;
                    }
                    continue;
                }
            };

            match self.failed_only(&mut batch, output) {
                Ok(delivered) => {
                    self.metrics.records_delivered(delivered);
                    if !batch.is_empty() {
                        debug!(delivered, remaining = batch.len(), "retrying failed records");
                    }
                }
                Err(err) => self.logger.error(&err.into()),
            }

            if !batch.is_empty() {
                tokio::task::yield_now().await;
            }
        }

        if !batch.is_empty() {
            self.metrics.records_dropped(batch.len());
            warn!(dropped = batch.len(), "runner stopped before delivery completed, dropping records");
        }
    }

    /// Narrows `batch` to the records the response reports as failed and
    /// returns how many were delivered. On a malformed response `batch` is left
    /// untouched.
    fn failed_only(
        &self,
        batch: &mut Vec<Record>,
        output: PutRecordsOutput,
    ) -> Result<usize, ValidationError> {
        if batch.len() != output.outcomes.len() {
            return Err(ValidationError::InvalidPutBatchResponse {
                submitted: batch.len(),
                received: output.outcomes.len(),
            });
        }

        let submitted = batch.len();
        let mut outcomes = output.outcomes.into_iter();
        batch.retain(|record| match outcomes.next() {
            Some(RecordOutcome::Failed { code, message }) => {
                self.logger.error(&BatchError::Delivery(DeliveryError::Record {
                    key: record.key.clone(),
                    code,
                    message,
                }));
                true
            }
            _ => false,
        });

        Ok(submitted - batch.len())
    }
}

#[async_trait]
impl<C: PutRecordsClient> Sink for RetryingSink<C> {
    async fn process(&self, ctx: &RunnerContext, batch: Vec<Record>) {
        self.send_batch(ctx, batch).await
    }
}
