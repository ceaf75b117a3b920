//! Permission-checked entry point for every document read and write.

use std::sync::Arc;

use dog_tenancy::{AccessEvaluator, AccessGrant, RateLimiter, Role, UserId};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::{
    CollectionName, Document, DocumentId, GatewayConfig, PartitionKey, Payload, SyncEngine, SyncError,
    SyncResult,
};

/// Caller identity as verified by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Session {
    user_id: UserId,
}

impl Session {
    /// Trusted as-is; verification happens upstream
    pub fn verified(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }
}

pub struct MutationGateway {
    engine: SyncEngine,
    evaluator: AccessEvaluator,
    config: GatewayConfig,
    limiter: Option<Arc<RateLimiter>>,
}

impl MutationGateway {
    pub fn new(engine: SyncEngine, evaluator: AccessEvaluator) -> Self {
        Self::with_config(engine, evaluator, GatewayConfig::default())
    }

    pub fn with_config(engine: SyncEngine, evaluator: AccessEvaluator, config: GatewayConfig) -> Self {
        let limiter = config
            .write_limit
            .clone()
            .map(|limit| Arc::new(RateLimiter::new(limit)));
        Self {
            engine,
            evaluator,
            config,
            limiter,
        }
    }

    /// Share a limiter across gateways instead of the one built from the config
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    fn required_role(&self, collection: &CollectionName) -> Role {
        if self.config.is_admin_restricted(collection) {
            Role::Admin
        } else {
            Role::Member
        }
    }

    async fn authorize(&self, session: &Session, partition: &PartitionKey) -> SyncResult<AccessGrant> {
        let role = self.required_role(&partition.collection);
        self.evaluator
            .require(session.user_id(), &partition.tenant_id, role)
            .await
            .map_err(|e| {
                warn!(
                    user_id = %session.user_id(),
                    "denied {} access to {}: {}",
                    role,
                    partition,
                    e
                );
                SyncError::from(e)
            })
    }

    fn check_rate(&self, session: &Session, partition: &PartitionKey) -> SyncResult<()> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        let action = format!("write:{}", partition.collection);
        if limiter.check(session.user_id(), &action) {
            return Ok(());
        }
        warn!(user_id = %session.user_id(), "write rate limit hit on {}", partition);
        Err(SyncError::RateLimited(format!(
            "user {} exceeded {} writes per {:?} on {}",
            session.user_id(),
            limiter.config().limit,
            limiter.config().window,
            partition.collection
        )))
    }

    /// Start syncing a partition the caller can access
    pub async fn open(&self, session: &Session, partition: &PartitionKey) -> SyncResult<()> {
        self.authorize(session, partition).await?;
        self.engine.attach(partition)
    }

    /// Stop syncing a partition; same access rule as [`open`](Self::open)
    pub async fn close(&self, session: &Session, partition: &PartitionKey) -> SyncResult<()> {
        self.authorize(session, partition).await?;
        self.engine.detach(partition).await
    }

    #[instrument(skip_all, fields(tenant_id = %partition.tenant_id, collection = %partition.collection))]
    pub async fn list(&self, session: &Session, partition: &PartitionKey) -> SyncResult<Vec<Document>> {
        self.authorize(session, partition).await?;
        Ok(self.engine.list(partition))
    }

    pub async fn get(&self, session: &Session, partition: &PartitionKey, id: &DocumentId) -> SyncResult<Document> {
        self.authorize(session, partition).await?;
        self.engine
            .get(partition, id)
            .ok_or_else(|| SyncError::not_found(format!("document {id} in {partition}")))
    }

    /// Commit a write locally and wake the partition's reconciler.
    ///
    /// Generates a uuid v4 id when `id` is `None`. Fails with
    /// `PermissionDenied`, `RateLimited` or `InvalidPayload` before anything
    /// is written.
    #[instrument(skip_all, fields(tenant_id = %partition.tenant_id, collection = %partition.collection))]
    pub async fn upsert(
        &self,
        session: &Session,
        partition: &PartitionKey,
        id: Option<DocumentId>,
        payload: Value,
    ) -> SyncResult<Document> {
        self.authorize(session, partition).await?;
        self.check_rate(session, partition)?;
        let payload = Payload::from_value(payload)?;
        let document = self.engine.upsert(partition, id, payload);
        debug!(document_id = %document.id, "upsert committed locally");
        Ok(document)
    }

    #[instrument(skip_all, fields(tenant_id = %partition.tenant_id, collection = %partition.collection))]
    pub async fn delete(&self, session: &Session, partition: &PartitionKey, id: &DocumentId) -> SyncResult<()> {
        self.authorize(session, partition).await?;
        self.check_rate(session, partition)?;
        self.engine.delete(partition, id)
    }

    pub async fn upsert_typed<T: Serialize>(
        &self,
        session: &Session,
        partition: &PartitionKey,
        id: Option<DocumentId>,
        value: &T,
    ) -> SyncResult<Document> {
        let payload = Payload::from_serialize(value)?;
        self.upsert(session, partition, id, payload.into_value()).await
    }

    pub async fn list_typed<T: DeserializeOwned>(
        &self,
        session: &Session,
        partition: &PartitionKey,
    ) -> SyncResult<Vec<(DocumentId, T)>> {
        self.list(session, partition)
            .await?
            .into_iter()
            .map(|doc| Ok((doc.id, doc.payload.to_typed()?)))
            .collect()
    }
}
