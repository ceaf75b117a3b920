use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::PartitionKey;

/// Live counters for sync activity
#[derive(Debug, Default)]
pub struct SyncMetrics {
    mutations_queued: AtomicU64,
    mutations_confirmed: AtomicU64,
    conflicts_resolved: AtomicU64,
    rollbacks: AtomicU64,
    remote_applied: AtomicU64,
    rounds_succeeded: AtomicU64,
    rounds_failed: AtomicU64,
    partitions_rebuilt: AtomicU64,

    per_partition: RwLock<HashMap<PartitionKey, PartitionMetrics>>,
}

/// Counters for a single partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMetrics {
    pub queued: u64,
    pub confirmed: u64,
    pub conflicts: u64,
    pub rollbacks: u64,
    pub failed_rounds: u64,
}

impl PartitionMetrics {
    /// Share of confirmed writes among queued ones, as a percentage
    pub fn confirmation_rate(&self) -> f64 {
        if self.queued == 0 {
            100.0
        } else {
            (self.confirmed as f64 / self.queued as f64) * 100.0
        }
    }
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, partition: &PartitionKey, f: impl FnOnce(&mut PartitionMetrics)) {
        f(self.per_partition.write().entry(partition.clone()).or_default());
    }

    pub fn record_queued(&self, partition: &PartitionKey) {
        self.mutations_queued.fetch_add(1, Ordering::Relaxed);
        self.partition(partition, |m| m.queued += 1);
    }

    pub fn record_confirmed(&self, partition: &PartitionKey) {
        self.mutations_confirmed.fetch_add(1, Ordering::Relaxed);
        self.partition(partition, |m| m.confirmed += 1);
    }

    pub fn record_conflict(&self, partition: &PartitionKey) {
        self.conflicts_resolved.fetch_add(1, Ordering::Relaxed);
        self.partition(partition, |m| m.conflicts += 1);
    }

    pub fn record_rollback(&self, partition: &PartitionKey) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
        self.partition(partition, |m| m.rollbacks += 1);
    }

    pub fn record_remote_applied(&self, count: u64) {
        self.remote_applied.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_round(&self, partition: &PartitionKey, succeeded: bool) {
        if succeeded {
            self.rounds_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rounds_failed.fetch_add(1, Ordering::Relaxed);
            self.partition(partition, |m| m.failed_rounds += 1);
        }
    }

    pub fn record_rebuild(&self) {
        self.partitions_rebuilt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mutations_queued(&self) -> u64 {
        self.mutations_queued.load(Ordering::Relaxed)
    }

    pub fn mutations_confirmed(&self) -> u64 {
        self.mutations_confirmed.load(Ordering::Relaxed)
    }

    pub fn conflicts_resolved(&self) -> u64 {
        self.conflicts_resolved.load(Ordering::Relaxed)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    pub fn rounds_failed(&self) -> u64 {
        self.rounds_failed.load(Ordering::Relaxed)
    }

    pub fn partition_metrics(&self, partition: &PartitionKey) -> Option<PartitionMetrics> {
        self.per_partition.read().get(partition).cloned()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            mutations_queued: self.mutations_queued(),
            mutations_confirmed: self.mutations_confirmed(),
            conflicts_resolved: self.conflicts_resolved(),
            rollbacks: self.rollbacks(),
            remote_applied: self.remote_applied.load(Ordering::Relaxed),
            rounds_succeeded: self.rounds_succeeded.load(Ordering::Relaxed),
            rounds_failed: self.rounds_failed(),
            partitions_rebuilt: self.partitions_rebuilt.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the global counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub mutations_queued: u64,
    pub mutations_confirmed: u64,
    pub conflicts_resolved: u64,
    pub rollbacks: u64,
    pub remote_applied: u64,
    pub rounds_succeeded: u64,
    pub rounds_failed: u64,
    pub partitions_rebuilt: u64,
}
