use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConnectionState, DocumentId, PartitionKey};
use crate::conflict::VersionStamp;

/// Structured sync event stream for observability and audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    StateChanged {
        partition: PartitionKey,
        from: ConnectionState,
        to: ConnectionState,
        at: DateTime<Utc>,
    },

    /// Local write committed to the cache
    MutationQueued {
        partition: PartitionKey,
        document_id: DocumentId,
        seq: u64,
        at: DateTime<Utc>,
    },

    /// Remote store confirmed a pending mutation
    MutationConfirmed {
        partition: PartitionKey,
        document_id: DocumentId,
        seq: u64,
        version: u64,
        at: DateTime<Utc>,
    },

    /// Concurrent writes were resolved by stamp order
    ConflictResolved {
        partition: PartitionKey,
        document_id: DocumentId,
        winner: VersionStamp,
        loser: VersionStamp,
        at: DateTime<Utc>,
    },

    /// A remote delta was applied to the cache
    RemoteApplied {
        partition: PartitionKey,
        document_id: DocumentId,
        version: u64,
        at: DateTime<Utc>,
    },

    /// A rejected write was compensated
    RolledBack {
        partition: PartitionKey,
        document_id: DocumentId,
        reason: String,
        at: DateTime<Utc>,
    },

    /// Local partition state was discarded and is being resynced
    PartitionRebuilt {
        partition: PartitionKey,
        reason: String,
        at: DateTime<Utc>,
    },

    /// Retries exhausted; the partition runs offline
    Degraded {
        partition: PartitionKey,
        error: String,
        at: DateTime<Utc>,
    },

    /// Another holder took over the partition; its reconciler stopped and it
    /// is no longer attached
    LeaseLost {
        partition: PartitionKey,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl SyncEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::MutationQueued { .. } => "mutation_queued",
            Self::MutationConfirmed { .. } => "mutation_confirmed",
            Self::ConflictResolved { .. } => "conflict_resolved",
            Self::RemoteApplied { .. } => "remote_applied",
            Self::RolledBack { .. } => "rolled_back",
            Self::PartitionRebuilt { .. } => "partition_rebuilt",
            Self::Degraded { .. } => "degraded",
            Self::LeaseLost { .. } => "lease_lost",
        }
    }

    pub fn partition(&self) -> &PartitionKey {
        match self {
            Self::StateChanged { partition, .. }
            | Self::MutationQueued { partition, .. }
            | Self::MutationConfirmed { partition, .. }
            | Self::ConflictResolved { partition, .. }
            | Self::RemoteApplied { partition, .. }
            | Self::RolledBack { partition, .. }
            | Self::PartitionRebuilt { partition, .. }
            | Self::Degraded { partition, .. }
            | Self::LeaseLost { partition, .. } => partition,
        }
    }

    /// Document the event is about, if any
    pub fn document_id(&self) -> Option<&DocumentId> {
        match self {
            Self::MutationQueued { document_id, .. }
            | Self::MutationConfirmed { document_id, .. }
            | Self::ConflictResolved { document_id, .. }
            | Self::RemoteApplied { document_id, .. }
            | Self::RolledBack { document_id, .. } => Some(document_id),
            _ => None,
        }
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::StateChanged { at, .. }
            | Self::MutationQueued { at, .. }
            | Self::MutationConfirmed { at, .. }
            | Self::ConflictResolved { at, .. }
            | Self::RemoteApplied { at, .. }
            | Self::RolledBack { at, .. }
            | Self::PartitionRebuilt { at, .. }
            | Self::Degraded { at, .. }
            | Self::LeaseLost { at, .. } => at,
        }
    }
}
