use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DocumentId, Payload};
use crate::conflict::VersionStamp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum MutationOp {
    Upsert(Payload),
    Delete,
}

impl MutationOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Upsert(_) => "upsert",
            Self::Delete => "delete",
        }
    }
}

/// Entry of a partition's ordered pending-mutation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    /// Strictly increasing within a partition
    pub seq: u64,
    pub document_id: DocumentId,
    pub op: MutationOp,
    pub stamp: VersionStamp,
    pub queued_at: DateTime<Utc>,
}

impl PendingMutation {
    pub fn is_delete(&self) -> bool {
        matches!(self.op, MutationOp::Delete)
    }
}
