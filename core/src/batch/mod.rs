mod breach;

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::trace;

use crate::errors::Result;
use crate::record::{IntoRecord, Record};

pub use breach::BreachSignal;

/// Thread-safe accumulator of records waiting to be flushed.
///
/// Records are kept in insertion order. Once the accumulated size reaches the
/// threshold, the breach signal fires once and stays quiet until the reader
/// acknowledges it with [`Batch::mark_threshold_breach_read`].
#[derive(Debug)]
pub struct Batch {
    threshold: usize,
    records: Mutex<VecDeque<Record>>,
    breach: BreachSignal,
}

impl Batch {
    /// A threshold of 0 is treated as 1.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            records: Mutex::new(VecDeque::new()),
            breach: BreachSignal::new(),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Prepares `item` and appends it. A preparation failure leaves the batch untouched.
    pub fn add<R: IntoRecord>(&self, item: R) -> Result<()> {
        let record = item.into_record()?;

        let size = {
            let mut records = self.records.lock();
            records.push_back(record);
            records.len()
        };

        if size >= self.threshold && self.breach.fire() {
            trace!(size, threshold = self.threshold, "batch threshold breached");
        }

        Ok(())
    }

    pub fn current_size(&self) -> usize {
        self.records.lock().len()
    }

    /// Removes up to `max_size` of the oldest records. Never blocks on anything
    /// but the records lock; returns an empty vec when nothing is pending.
    pub fn pop_batch(&self, max_size: usize) -> Vec<Record> {
        let mut records = self.records.lock();
        let n = max_size.min(records.len());
        records.drain(..n).collect()
    }

    pub fn threshold_breach(&self) -> &BreachSignal {
        &self.breach
    }

    pub fn threshold_breached(&self) -> bool {
        self.current_size() >= self.threshold
    }

    pub fn mark_threshold_breach_read(&self) {
        self.breach.rearm();
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new(1)
    }
}
