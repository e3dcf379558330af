pub mod batch;
pub mod batcher;
pub mod config;
pub mod errors;
pub mod logger;
pub mod record;
pub mod runner;
pub mod sink;
pub mod telemetry;

pub use batch::{Batch, BreachSignal};
pub use batcher::Batcher;
pub use config::{BatcherConfig, SinkConfig};
pub use errors::{BatchError, DeliveryError, FailureKind, Result};
pub use logger::{ErrorLogger, NopLogger, TracingLogger};
pub use record::{IntoRecord, JsonRecord, Record};
pub use runner::{BatchRunner, RunnerContext, RunnerState};
pub use sink::{PutRecordsClient, PutRecordsOutput, RecordOutcome, RetryingSink, Sink, put_record};
pub use telemetry::{BatcherMetrics, MetricsSnapshot};
