use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "batch_core=info,runner_container=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Counters shared between the accumulator side and the delivery side.
#[derive(Debug, Default)]
pub struct BatcherMetrics {
    records_added: AtomicU64,
    records_rejected: AtomicU64,
    records_delivered: AtomicU64,
    records_dropped: AtomicU64,
    sub_batches_flushed: AtomicU64,
    delivery_attempts: AtomicU64,
    throttled_attempts: AtomicU64,
    last_flush_at: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub records_added: u64,
    pub records_rejected: u64,
    pub records_delivered: u64,
    pub records_dropped: u64,
    pub sub_batches_flushed: u64,
    pub delivery_attempts: u64,
    pub throttled_attempts: u64,
    pub avg_sub_batch_size: f64,
    pub last_flush_at: Option<DateTime<Utc>>,
}

impl BatcherMetrics {
    pub fn record_added(&self) {
        self.records_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.records_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sub_batch_flushed(&self) {
        self.sub_batches_flushed.fetch_add(1, Ordering::Relaxed);
        *self.last_flush_at.lock() = Some(Utc::now());
    }

    pub fn delivery_attempt(&self) {
        self.delivery_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn throttled_attempt(&self) {
        self.throttled_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records_delivered(&self, n: usize) {
        self.records_delivered.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn records_dropped(&self, n: usize) {
        self.records_dropped.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let records_delivered = self.records_delivered.load(Ordering::Relaxed);
        let records_dropped = self.records_dropped.load(Ordering::Relaxed);
        let sub_batches_flushed = self.sub_batches_flushed.load(Ordering::Relaxed);
        let avg_sub_batch_size = if sub_batches_flushed == 0 {
            0.0
        } else {
            (records_delivered + records_dropped) as f64 / sub_batches_flushed as f64
        };

        MetricsSnapshot {
            records_added: self.records_added.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            records_delivered,
            records_dropped,
            sub_batches_flushed,
            delivery_attempts: self.delivery_attempts.load(Ordering::Relaxed),
            throttled_attempts: self.throttled_attempts.load(Ordering::Relaxed),
            avg_sub_batch_size,
            last_flush_at: *self.last_flush_at.lock(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let metrics = BatcherMetrics::default();
        assert!(metrics.snapshot().last_flush_at.is_none());

        metrics.record_added();
        metrics.record_added();
        metrics.record_rejected();
        metrics.sub_batch_flushed();
        metrics.delivery_attempt();
        metrics.records_delivered(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.records_added, 2);
        assert_eq!(snapshot.records_rejected, 1);
        assert_eq!(snapshot.records_delivered, 2);
        assert_eq!(snapshot.sub_batches_flushed, 1);
        assert_eq!(snapshot.avg_sub_batch_size, 2.0);
        assert!(snapshot.last_flush_at.is_some());
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(BatcherMetrics::default().snapshot()).unwrap();
        assert_eq!(json["records_added"], 0);
        assert!(json["last_flush_at"].is_null());
    }
}
