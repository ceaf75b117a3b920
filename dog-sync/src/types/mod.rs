pub mod document;
pub mod events;
pub mod ids;
pub mod mutation;
pub mod payload;
pub mod state;

pub use document::{ConfirmedState, Document, SyncState};
pub use events::SyncEvent;
pub use ids::{CollectionName, DocumentId, LeaseToken, PartitionKey, ReplicaId};
pub use mutation::{MutationOp, PendingMutation};
pub use payload::Payload;
pub use state::{ConnectionState, PartitionStatus, ReconcilerStatus};
