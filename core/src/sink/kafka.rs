use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use rdkafka::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord};
use tracing::{debug, info};

use crate::config::KafkaSinkOptions;
use crate::errors::{DeliveryError, FailureKind, Result};
use crate::record::Record;
use crate::sink::{PutRecordsClient, PutRecordsOutput, RecordOutcome};

/// Produces each record to a single topic, keyed by the record key.
pub struct KafkaClient {
    producer: FutureProducer,
    topic: String,
    queue_timeout: Duration,
}

impl KafkaClient {
    pub fn new(options: &KafkaSinkOptions) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &options.bootstrap_servers)
            .set("message.timeout.ms", options.message_timeout_ms.to_string())
            .create()
            .map_err(|e| DeliveryError::Transport {
                reason: format!("failed to create kafka producer: {e}"),
            })?;

        info!(
            bootstrap_servers = %options.bootstrap_servers,
            topic = %options.topic,
            "kafka producer created"
        );

        Ok(Self {
            producer,
            topic: options.topic.clone(),
            queue_timeout: Duration::from_millis(options.queue_timeout_ms),
        })
    }
}

/// A full local producer queue is librdkafka's backpressure signal.
pub fn classify(err: &KafkaError) -> FailureKind {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::QueueFull) => FailureKind::RateLimited,
        _ => FailureKind::Other,
    }
}

fn error_code(err: &KafkaError) -> String {
    err.rdkafka_error_code()
        .map(|code| format!("{code:?}"))
        .unwrap_or_else(|| "Unknown".to_string())
}

#[async_trait]
impl PutRecordsClient for KafkaClient {
    async fn put_records(&self, records: &[Record]) -> std::result::Result<PutRecordsOutput, DeliveryError> {
        let deliveries = records.iter().map(|record| {
            let message = FutureRecord::to(&self.topic)
                .key(record.key.as_str())
                .payload(record.payload.as_slice());
            self.producer.send(message, self.queue_timeout)
        });
        let results = join_all(deliveries).await;

        let mut throttled = 0;
        let mut last_error = None;
        let outcomes: Vec<RecordOutcome> = results
            .into_iter()
            .map(|result| match result {
                Ok(_) => RecordOutcome::Delivered,
                Err((err, _message)) => {
                    if classify(&err) == FailureKind::RateLimited {
                        throttled += 1;
                    }
                    let outcome = RecordOutcome::failed(error_code(&err), err.to_string());
                    last_error = Some(err);
                    outcome
                }
            })
            .collect();

        if !records.is_empty() && throttled == records.len() {
            return Err(DeliveryError::Throttled {
                reason: last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "producer queue full".to_string()),
            });
        }

        debug!(
            topic = %self.topic,
            submitted = records.len(),
            failed = outcomes.iter().filter(|o| o.is_failed()).count(),
            "kafka put completed"
        );
        Ok(PutRecordsOutput::new(outcomes))
    }
}
