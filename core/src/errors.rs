use std::time::Duration;

use thiserror::Error;

/// Linear backoff step applied per consecutive rate-limited attempt.
pub const THROTTLE_BACKOFF_STEP: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("runner has been stopped")]
    RunnerStopped,

    #[error("runner is already running")]
    AlreadyRunning,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Failed to load configuration from {source}: {error}")]
    LoadFailed {
        source: String,
        #[source]
        error: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("record key must not be empty")]
    EmptyKey,

    #[error("invalid put batch response: submitted {submitted} records, got {received} outcomes")]
    InvalidPutBatchResponse { submitted: usize, received: usize },
}

/// How a failed delivery call should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The downstream rejected the call for throughput reasons.
    RateLimited,
    Other,
}

impl FailureKind {
    /// Delay before retrying after the `attempt`-th consecutive failure of this kind.
    pub fn backoff(self, attempt: u32) -> Duration {
        match self {
            FailureKind::RateLimited => THROTTLE_BACKOFF_STEP * attempt,
            FailureKind::Other => Duration::ZERO,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("throughput exceeded: {reason}")]
    Throttled { reason: String },

    #[error("transport failure: {reason}")]
    Transport { reason: String },

    #[error("failed to deliver record {key}: {code}: {message}")]
    Record {
        key: String,
        code: String,
        message: String,
    },
}

impl DeliveryError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DeliveryError::Throttled { .. } => FailureKind::RateLimited,
            _ => FailureKind::Other,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind() == FailureKind::RateLimited
    }
}

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("JSON serialization failed: {reason}")]
    Json { reason: String },

    #[error("YAML serialization failed: {reason}")]
    Yaml { reason: String },
}

pub type Result<T> = std::result::Result<T, BatchError>;

impl From<serde_json::Error> for BatchError {
    fn from(err: serde_json::Error) -> Self {
        BatchError::Serialization(SerializationError::Json {
            reason: err.to_string(),
        })
    }
}

impl From<serde_yaml::Error> for BatchError {
    fn from(err: serde_yaml::Error) -> Self {
        BatchError::Serialization(SerializationError::Yaml {
            reason: err.to_string(),
        })
    }
}

impl BatchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            BatchError::Delivery(_) => true,
            BatchError::Validation(ValidationError::InvalidPutBatchResponse { .. }) => true,
            BatchError::Validation(ValidationError::EmptyKey) => false,
            BatchError::Config(_) => false,
            BatchError::Serialization(_) => false,
            BatchError::RunnerStopped => false,
            BatchError::AlreadyRunning => false,
        }
    }

    pub fn get_retry_delay_ms(&self, attempt: u32) -> u64 {
        match self {
            BatchError::Delivery(err) => err.kind().backoff(attempt).as_millis() as u64,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::Invalid {
            message: "Test message".to_string(),
        };
        assert_eq!(error.to_string(), "Invalid configuration: Test message");
    }

    #[test]
    fn test_validation_error_display() {
        let error = ValidationError::InvalidPutBatchResponse {
            submitted: 3,
            received: 2,
        };
        assert_eq!(
            error.to_string(),
            "invalid put batch response: submitted 3 records, got 2 outcomes"
        );
    }

    #[test]
    fn test_runner_stopped_display() {
        assert_eq!(
            BatchError::RunnerStopped.to_string(),
            "runner has been stopped"
        );
    }

    #[test]
    fn test_batch_error_from_serde_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>(r#"{"invalid": json}"#).unwrap_err();

        match BatchError::from(json_error) {
            BatchError::Serialization(SerializationError::Json { .. }) => {}
            other => panic!("Expected Serialization error, got {:?}", other),
        }
    }

    #[test]
    fn test_batch_error_from_serde_yaml_error() {
        let yaml_str = r#"
invalid yaml content:
  - missing quotes
  - "improper: structure
"#;
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>(yaml_str).unwrap_err();

        match BatchError::from(yaml_error) {
            BatchError::Serialization(SerializationError::Yaml { .. }) => {}
            other => panic!("Expected Serialization error, got {:?}", other),
        }
    }

    #[test]
    fn test_failure_classification() {
        let throttled = DeliveryError::Throttled {
            reason: "slow down".to_string(),
        };
        let transport = DeliveryError::Transport {
            reason: "connection reset".to_string(),
        };

        assert!(throttled.is_rate_limited());
        assert!(!transport.is_rate_limited());
        assert_eq!(transport.kind(), FailureKind::Other);
    }

    #[test]
    fn test_backoff_is_linear_for_rate_limits_only() {
        assert_eq!(FailureKind::RateLimited.backoff(1), Duration::from_millis(100));
        assert_eq!(FailureKind::RateLimited.backoff(3), Duration::from_millis(300));
        assert_eq!(FailureKind::Other.backoff(7), Duration::ZERO);
    }

    #[test]
    fn test_is_retryable() {
        let retryable_errors = vec![
            BatchError::Delivery(DeliveryError::Throttled {
                reason: "test".to_string(),
            }),
            BatchError::Delivery(DeliveryError::Transport {
                reason: "test".to_string(),
            }),
            BatchError::Validation(ValidationError::InvalidPutBatchResponse {
                submitted: 1,
                received: 0,
            }),
        ];

        for error in retryable_errors {
            assert!(error.is_retryable(), "Error should be retryable: {:?}", error);
        }

        let non_retryable_errors = vec![
            BatchError::Validation(ValidationError::EmptyKey),
            BatchError::RunnerStopped,
            BatchError::Config(ConfigError::ValidationFailed {
                reason: "test".to_string(),
            }),
            BatchError::Serialization(SerializationError::Json {
                reason: "test".to_string(),
            }),
        ];

        for error in non_retryable_errors {
            assert!(!error.is_retryable(), "Error should not be retryable: {:?}", error);
        }
    }

    #[test]
    fn test_get_retry_delay_ms() {
        let throttled = BatchError::Delivery(DeliveryError::Throttled {
            reason: "test".to_string(),
        });
        let transport = BatchError::Delivery(DeliveryError::Transport {
            reason: "test".to_string(),
        });

        assert_eq!(throttled.get_retry_delay_ms(2), 200);
        assert_eq!(transport.get_retry_delay_ms(2), 0);
        assert_eq!(BatchError::RunnerStopped.get_retry_delay_ms(2), 0);
    }

    #[test]
    fn test_error_chain_display() {
        let outer_error = BatchError::Config(ConfigError::MissingField {
            field: "topic".to_string(),
        });

        let error_string = outer_error.to_string();
        assert!(error_string.contains("Configuration error"));
        assert!(error_string.contains("Missing required field: topic"));
    }
}
