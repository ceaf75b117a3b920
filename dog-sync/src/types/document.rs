use serde::{Deserialize, Serialize};

use super::{DocumentId, Payload};
use crate::conflict::VersionStamp;

/// Sync status of a cached document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Local write not yet confirmed by the remote store
    Pending,
    /// Matches the last remote-confirmed state
    Synced,
    /// A pending write was superseded remotely and is being re-resolved
    Conflict,
}

/// Last state of a document acknowledged by the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedState {
    pub payload: Payload,
    pub stamp: VersionStamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub payload: Payload,
    pub stamp: VersionStamp,
    pub sync_state: SyncState,
    /// Partition-local modification sequence; orders `list()` results
    pub modified_seq: u64,
    /// Rollback target for compensating a rejected write
    pub confirmed: Option<ConfirmedState>,
}

impl Document {
    pub fn version(&self) -> u64 {
        self.stamp.version
    }

    pub fn is_deleted(&self) -> bool {
        self.stamp.tombstone
    }

    pub fn is_pending(&self) -> bool {
        self.sync_state != SyncState::Synced
    }
}
