//! # dog-sync: tenant-isolated offline-first document sync for DogRS
//!
//! Documents live in a local cache partitioned per (tenant, collection) and
//! stay readable and writable without a network. Each attached partition has
//! one reconciler task that pushes the pending-mutation log to a
//! [`RemoteStore`] and pulls remote deltas back, resolving concurrent writes
//! by logical [`VersionStamp`] order with tombstone dominance.
//!
//! - **[`MutationGateway`]** is the only way in. It checks the caller through
//!   `dog_tenancy::AccessEvaluator` before touching the cache.
//! - **[`SyncEngine`]** owns the cache, the reconcilers and their leases.
//! - **[`SyncEvent`]**s are broadcast for audit and UI state.
//!
//! ```rust
//! use std::sync::Arc;
//! use dog_sync::prelude::*;
//! use dog_sync::remote::MemoryRemoteStore;
//! use dog_tenancy::backend::memory::MemoryTenancyBackend;
//! use dog_tenancy::{AccessEvaluator, MembershipStore, Role, TenantMembership};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let backend = Arc::new(MemoryTenancyBackend::new());
//! backend.seed_membership(TenantMembership::new("t1".into(), "alice".into(), Role::Member));
//! let evaluator = AccessEvaluator::new(Arc::new(MembershipStore::new(backend)));
//!
//! let engine = SyncEngine::new(Arc::new(MemoryRemoteStore::new()));
//! let gateway = MutationGateway::new(engine, evaluator);
//!
//! let alice = Session::verified("alice");
//! let notes = PartitionKey::new("t1", "notes");
//! let doc = gateway.upsert(&alice, &notes, None, json!({ "title": "agenda" })).await?;
//!
//! assert_eq!(doc.sync_state, SyncState::Pending);
//! assert_eq!(gateway.list(&alice, &notes).await?.len(), 1);
//! # Ok::<(), SyncError>(())
//! # }).unwrap();
//! ```

pub(crate) mod cache;
pub mod config;
pub mod conflict;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod lease;
pub mod observability;
pub(crate) mod reconciler;
pub mod remote;
pub mod types;

pub use cache::PartitionSnapshot;
pub use config::{GatewayConfig, SyncConfig};
pub use conflict::{Resolution, VersionStamp};
pub use connectivity::Connectivity;
pub use engine::{EventStream, ImportOutcome, SyncEngine, SyncEngineBuilder};
pub use error::{RemoteError, RemoteResult, SyncError, SyncResult};
pub use gateway::{MutationGateway, Session};
pub use lease::{LeaseRegistry, PartitionLease};
pub use observability::{MetricsSnapshot, PartitionMetrics, SyncMetrics};
pub use remote::{ChangeBatch, RemoteChange, RemoteRecord, RemoteStore, WriteOutcome};
pub use types::{
    CollectionName, ConfirmedState, ConnectionState, Document, DocumentId, LeaseToken, MutationOp,
    PartitionKey, PartitionStatus, Payload, PendingMutation, ReconcilerStatus, ReplicaId, SyncEvent,
    SyncState,
};

pub mod prelude {
    pub use crate::{
        Connectivity, ConnectionState, Document, DocumentId, GatewayConfig, MutationGateway,
        PartitionKey, Payload, Session, SyncConfig, SyncEngine, SyncError, SyncEvent, SyncResult,
        SyncState,
    };

    pub use async_trait::async_trait;
}
