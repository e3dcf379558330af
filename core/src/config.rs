use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, Result};
use crate::runner::MAX_DELIVERY_RECORDS;

pub const CONFIG_ENV_VAR: &str = "BATCHER_CONFIG";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Accumulated record count that triggers an early flush.
    pub threshold: usize,
    pub max_batch_age_ms: u64,
    /// Upper bound on records per sink call.
    pub max_delivery_size: usize,
    /// How long graceful shutdown may take before the runner is abandoned.
    pub stop_timeout_ms: u64,
    pub sink: SinkConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    #[default]
    Stdout,
    Kafka(KafkaSinkOptions),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaSinkOptions {
    pub bootstrap_servers: String,
    pub topic: String,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
}

fn default_message_timeout_ms() -> u64 {
    30000
}

fn default_queue_timeout_ms() -> u64 {
    0
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            threshold: 250,
            max_batch_age_ms: 60000,
            max_delivery_size: MAX_DELIVERY_RECORDS,
            stop_timeout_ms: 5000,
            sink: SinkConfig::default(),
        }
    }
}

pub async fn load_config(config_path: Option<&str>) -> anyhow::Result<BatcherConfig> {
    let config = match config_path {
        Some(path) => BatcherConfig::from_file(path)?,
        None => BatcherConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

impl BatcherConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            source: path.to_string(),
            error: Box::new(e),
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_env() -> Result<Self> {
        Self::from_env_var(CONFIG_ENV_VAR)
    }

    fn from_env_var(name: &str) -> Result<Self> {
        let config_str = std::env::var(name).map_err(|_| ConfigError::MissingField {
            field: name.to_string(),
        })?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: BatcherConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_delivery_size == 0 || self.max_delivery_size > MAX_DELIVERY_RECORDS {
            return Err(ConfigError::ValidationFailed {
                reason: format!(
                    "max_delivery_size must be between 1 and {MAX_DELIVERY_RECORDS}, got {}",
                    self.max_delivery_size
                ),
            }
            .into());
        }
        if self.threshold > MAX_DELIVERY_RECORDS {
            return Err(ConfigError::ValidationFailed {
                reason: format!(
                    "threshold must be at most {MAX_DELIVERY_RECORDS}, got {}",
                    self.threshold
                ),
            }
            .into());
        }
        if self.max_batch_age_ms == 0 {
            return Err(ConfigError::ValidationFailed {
                reason: "max_batch_age_ms must be greater than zero".to_string(),
            }
            .into());
        }

        if let SinkConfig::Kafka(options) = &self.sink {
            if options.bootstrap_servers.is_empty() {
                return Err(ConfigError::MissingField {
                    field: "sink.bootstrap_servers".to_string(),
                }
                .into());
            }
            if options.topic.is_empty() {
                return Err(ConfigError::MissingField {
                    field: "sink.topic".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn max_batch_age(&self) -> Duration {
        Duration::from_millis(self.max_batch_age_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}
