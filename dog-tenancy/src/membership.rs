//! Membership store: the single source of truth for (user, tenant) → role.
//!
//! Reads come in two capabilities with different privileges:
//!
//! - [`ServiceMembershipLookup`]: unfiltered, service-level. Used by the
//!   [`AccessEvaluator`](crate::AccessEvaluator) and nothing else.
//! - [`CallerScopedMemberships`]: what a given caller is allowed to see,
//!   i.e. their own rows, plus every row of tenants they administer.
//!
//! Writes require an [`AdminGrant`] and re-check it against the current row
//! before touching the backend, so a grant issued before a demotion cannot be
//! replayed after it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::{
    access::AdminGrant, backend::MembershipBackend, Role, TenancyError, TenancyResult, TenantId,
    TenantMembership, UserId,
};

/// Service-level membership lookup, bypassing caller-based filtering
#[async_trait]
pub trait ServiceMembershipLookup: Send + Sync {
    async fn get_membership(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
    ) -> TenancyResult<Option<TenantMembership>>;
}

pub struct MembershipStore<B: MembershipBackend> {
    backend: Arc<B>,
}

impl<B: MembershipBackend> MembershipStore<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Caller-filtered view for `caller`
    pub fn caller_scoped(&self, caller: UserId) -> CallerScopedMemberships<'_, B> {
        CallerScopedMemberships { store: self, caller }
    }

    /// Add `user_id` to the grant's tenant with `role`
    #[instrument(skip(self, grant), fields(tenant_id = %grant.tenant_id(), actor = %grant.user_id()))]
    pub async fn invite(&self, grant: &AdminGrant, user_id: UserId, role: Role) -> TenancyResult<TenantMembership> {
        self.revalidate(grant).await?;
        let membership = TenantMembership::new(grant.tenant_id().clone(), user_id, role)
            .with_invited_by(grant.user_id().clone());
        let created = self.backend.insert_membership(membership).await?;
        info!("Added {} to tenant {} as {}", created.user_id, created.tenant_id, created.role);
        Ok(created)
    }

    #[instrument(skip(self, grant), fields(tenant_id = %grant.tenant_id(), actor = %grant.user_id()))]
    pub async fn change_role(&self, grant: &AdminGrant, user_id: &UserId, role: Role) -> TenancyResult<TenantMembership> {
        self.revalidate(grant).await?;
        let updated = self.backend.update_role(grant.tenant_id(), user_id, role).await?;
        info!("Changed role of {} in tenant {} to {}", user_id, updated.tenant_id, role);
        Ok(updated)
    }

    #[instrument(skip(self, grant), fields(tenant_id = %grant.tenant_id(), actor = %grant.user_id()))]
    pub async fn revoke(&self, grant: &AdminGrant, user_id: &UserId) -> TenancyResult<()> {
        self.revalidate(grant).await?;
        if !self.backend.delete_membership(grant.tenant_id(), user_id).await? {
            return Err(TenancyError::not_found(format!(
                "membership of {} in {}",
                user_id,
                grant.tenant_id()
            )));
        }
        info!("Revoked {} from tenant {}", user_id, grant.tenant_id());
        Ok(())
    }

    async fn revalidate(&self, grant: &AdminGrant) -> TenancyResult<()> {
        let current = self
            .backend
            .fetch_membership(grant.user_id(), grant.tenant_id())
            .await?;
        match current {
            Some(m) if m.role == Role::Admin => Ok(()),
            _ => Err(TenancyError::permission_denied(format!(
                "user {} is no longer an admin of tenant {}",
                grant.user_id(),
                grant.tenant_id()
            ))),
        }
    }
}

#[async_trait]
impl<B: MembershipBackend + 'static> ServiceMembershipLookup for MembershipStore<B> {
    async fn get_membership(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
    ) -> TenancyResult<Option<TenantMembership>> {
        self.backend.fetch_membership(user_id, tenant_id).await
    }
}

/// Membership rows visible to one caller
pub struct CallerScopedMemberships<'a, B: MembershipBackend> {
    store: &'a MembershipStore<B>,
    caller: UserId,
}

impl<'a, B: MembershipBackend> CallerScopedMemberships<'a, B> {
    pub fn caller(&self) -> &UserId {
        &self.caller
    }

    /// The caller's own row in `tenant_id`
    pub async fn own_membership(&self, tenant_id: &TenantId) -> TenancyResult<Option<TenantMembership>> {
        self.store.backend.fetch_membership(&self.caller, tenant_id).await
    }

    /// All tenants the caller belongs to
    pub async fn my_tenants(&self) -> TenancyResult<Vec<TenantMembership>> {
        self.store.backend.memberships_for_user(&self.caller).await
    }

    /// Members of `tenant_id` as seen by the caller: every row for admins,
    /// otherwise only the caller's own row
    pub async fn members_of(&self, tenant_id: &TenantId) -> TenancyResult<Vec<TenantMembership>> {
        match self.own_membership(tenant_id).await? {
            Some(own) if own.role == Role::Admin => self.store.backend.memberships_for_tenant(tenant_id).await,
            Some(own) => Ok(vec![own]),
            None => Ok(Vec::new()),
        }
    }
}
