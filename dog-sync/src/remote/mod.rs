pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{conflict::VersionStamp, DocumentId, PartitionKey, Payload, RemoteResult};

pub use memory::MemoryRemoteStore;

/// Authoritative state of one document on the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: DocumentId,
    /// `None` for tombstones
    pub payload: Option<Payload>,
    pub stamp: VersionStamp,
}

impl RemoteRecord {
    pub fn is_tombstone(&self) -> bool {
        self.stamp.tombstone
    }
}

/// One entry of a partition's change log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChange {
    pub cursor: u64,
    pub record: RemoteRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub changes: Vec<RemoteChange>,
    /// Cursor to resume from; equals the request cursor when nothing is new
    pub next_cursor: u64,
    pub has_more: bool,
}

/// Result of a conditional remote write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// The write won and is now the remote state
    Accepted(RemoteRecord),
    /// A higher-stamped write already holds the document
    Superseded(RemoteRecord),
}

/// Remote authoritative store, addressed per partition.
///
/// Only the reconciler talks to it. Writes are conditional on the stamp
/// order of [`VersionStamp`]: a write whose stamp does not supersede the
/// current record is answered with [`WriteOutcome::Superseded`]. Replaying a
/// write with the exact current stamp is accepted without a new change entry.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, partition: &PartitionKey, id: &DocumentId) -> RemoteResult<Option<RemoteRecord>>;

    async fn put(
        &self,
        partition: &PartitionKey,
        id: &DocumentId,
        payload: &Payload,
        stamp: &VersionStamp,
    ) -> RemoteResult<WriteOutcome>;

    async fn delete(
        &self,
        partition: &PartitionKey,
        id: &DocumentId,
        stamp: &VersionStamp,
    ) -> RemoteResult<WriteOutcome>;

    /// Changes with a cursor strictly greater than `cursor`, oldest first
    async fn list_changes_since(
        &self,
        partition: &PartitionKey,
        cursor: u64,
        limit: usize,
    ) -> RemoteResult<ChangeBatch>;
}
