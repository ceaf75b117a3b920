pub mod memory;

use async_trait::async_trait;

use crate::{
    Role, TenancyResult, Tenant, TenantId, TenantMembership, TenantProfilePatch, UserId,
};

/// Storage primitives for tenant records.
///
/// Implementations must report transport failures as
/// [`TenancyError::Retryable`](crate::TenancyError::Retryable) and absence as
/// `Ok(None)`; the two are never conflated.
#[async_trait]
pub trait TenantBackend: Send + Sync {
    async fn fetch_by_code(&self, code: &str) -> TenancyResult<Option<Tenant>>;

    async fn fetch_by_id(&self, id: &TenantId) -> TenancyResult<Option<Tenant>>;

    /// Apply a profile patch and return the updated record
    async fn update_tenant(&self, id: &TenantId, patch: &TenantProfilePatch) -> TenancyResult<Tenant>;
}

/// Storage primitives for the (user, tenant) → role relation.
///
/// This is the unfiltered service-level path. Callers outside this crate go
/// through [`MembershipStore`](crate::MembershipStore), which splits it into
/// the service lookup and the caller-scoped view.
#[async_trait]
pub trait MembershipBackend: Send + Sync {
    async fn fetch_membership(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
    ) -> TenancyResult<Option<TenantMembership>>;

    async fn memberships_for_tenant(&self, tenant_id: &TenantId) -> TenancyResult<Vec<TenantMembership>>;

    async fn memberships_for_user(&self, user_id: &UserId) -> TenancyResult<Vec<TenantMembership>>;

    /// Insert a new row; fails with `Conflict` if `(tenant, user)` exists
    async fn insert_membership(&self, membership: TenantMembership) -> TenancyResult<TenantMembership>;

    /// Update the role of one row; fails with `NotFound` if it is absent
    async fn update_role(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        role: Role,
    ) -> TenancyResult<TenantMembership>;

    /// Delete one row, returning whether it existed
    async fn delete_membership(&self, tenant_id: &TenantId, user_id: &UserId) -> TenancyResult<bool>;
}
