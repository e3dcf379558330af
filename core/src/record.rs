use serde::Serialize;

use crate::errors::{Result, ValidationError};

/// A unit of data submitted for delivery, regardless of which stream it ends up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// opaque partition / routing key
    pub key: String,
    /// raw payload, e.g. a serialized event
    pub payload: Vec<u8>,
}

impl Record {
    pub fn new(key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.key.is_empty() {
            return Err(ValidationError::EmptyKey);
        }
        Ok(())
    }
}

/// Prepares a value for insertion into a [`crate::batch::Batch`].
///
/// Preparation runs before the batch lock is taken. A failure here means the
/// record is never inserted and never counts towards the flush threshold.
pub trait IntoRecord {
    fn into_record(self) -> Result<Record>;
}

impl IntoRecord for Record {
    fn into_record(self) -> Result<Record> {
        self.validate()?;
        Ok(self)
    }
}

/// A serializable value paired with the key it should be routed by.
/// The value is encoded as JSON when the record is prepared.
pub struct JsonRecord<T> {
    key: String,
    value: T,
}

impl<T: Serialize> JsonRecord<T> {
    pub fn new(key: impl Into<String>, value: T) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

impl<T: Serialize> IntoRecord for JsonRecord<T> {
    fn into_record(self) -> Result<Record> {
        let payload = serde_json::to_vec(&self.value)?;
        Record::new(self.key, payload).into_record()
    }
}
