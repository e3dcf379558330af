#[cfg(feature = "kafka")]
pub mod kafka;
pub mod retry;
pub mod stdout;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::SinkConfig;
#[cfg(not(feature = "kafka"))]
use crate::errors::ConfigError;
use crate::errors::{DeliveryError, Result, ValidationError};
use crate::record::{IntoRecord, Record};
use crate::runner::RunnerContext;

pub use retry::RetryingSink;
pub use stdout::StdoutClient;

/// The `Sink` trait defines the contract for any destination of flushed sub-batches.
///
/// Failures are never returned to the runner. A sink logs them through its
/// logger and decides on its own how long to keep retrying, bounded only by
/// the runner stopping.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn process(&self, ctx: &RunnerContext, batch: Vec<Record>);
}

#[async_trait]
impl<S: Sink + ?Sized> Sink for Box<S> {
    async fn process(&self, ctx: &RunnerContext, batch: Vec<Record>) {
        (**self).process(ctx, batch).await
    }
}

#[async_trait]
impl<S: Sink + ?Sized> Sink for Arc<S> {
    async fn process(&self, ctx: &RunnerContext, batch: Vec<Record>) {
        (**self).process(ctx, batch).await
    }
}

/// Per-record result reported by a downstream put call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Delivered,
    Failed { code: String, message: String },
}

impl RecordOutcome {
    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        RecordOutcome::Failed {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RecordOutcome::Failed { .. })
    }
}

/// Response to a put call. A well-formed response has exactly one outcome per
/// submitted record, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutRecordsOutput {
    pub outcomes: Vec<RecordOutcome>,
}

impl PutRecordsOutput {
    pub fn new(outcomes: Vec<RecordOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn all_delivered(n: usize) -> Self {
        Self::new(vec![RecordOutcome::Delivered; n])
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_failed()).count()
    }
}

/// A streaming service that accepts records in bulk.
///
/// A returned `Err` means the call as a whole failed and nothing is known about
/// individual records. Its [`DeliveryError::kind`] decides the backoff.
#[async_trait]
pub trait PutRecordsClient: Send + Sync {
    async fn put_records(&self, records: &[Record]) -> std::result::Result<PutRecordsOutput, DeliveryError>;
}

#[async_trait]
impl<C: PutRecordsClient + ?Sized> PutRecordsClient for Arc<C> {
    async fn put_records(&self, records: &[Record]) -> std::result::Result<PutRecordsOutput, DeliveryError> {
        (**self).put_records(records).await
    }
}

/// Builds the configured downstream client.
pub fn build_client(config: &SinkConfig) -> Result<Arc<dyn PutRecordsClient>> {
    match config {
        SinkConfig::Stdout => Ok(Arc::new(StdoutClient::stdout())),
        #[cfg(feature = "kafka")]
        SinkConfig::Kafka(options) => Ok(Arc::new(kafka::KafkaClient::new(options)?)),
        #[cfg(not(feature = "kafka"))]
        SinkConfig::Kafka(_) => Err(ConfigError::Invalid {
            message: "kafka sink requires the `kafka` feature".to_string(),
        }
        .into()),
    }
}

/// Prepares a single record and sends it straight to `client`, bypassing any
/// batching. Nothing is retried: a failed call or a rejected record is
/// returned to the caller.
pub async fn put_record<C, R>(client: &C, item: R) -> Result<()>
where
    C: PutRecordsClient + ?Sized,
    R: IntoRecord,
{
    let record = item.into_record()?;
    let output = client.put_records(std::slice::from_ref(&record)).await?;

    match output.outcomes.as_slice() {
        [RecordOutcome::Delivered] => Ok(()),
        [RecordOutcome::Failed { code, message }] => Err(DeliveryError::Record {
            key: record.key,
            code: code.clone(),
            message: message.clone(),
        }
        .into()),
        outcomes => Err(ValidationError::InvalidPutBatchResponse {
            submitted: 1,
            received: outcomes.len(),
        }
        .into()),
    }
}
