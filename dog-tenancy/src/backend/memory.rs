use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    backend::{MembershipBackend, TenantBackend},
    Role, TenancyError, TenancyResult, Tenant, TenantId, TenantMembership, TenantProfilePatch,
    UserId,
};

type MembershipRows = HashMap<(TenantId, UserId), TenantMembership>;

/// In-memory tenancy backend for testing and development
#[derive(Clone, Default)]
pub struct MemoryTenancyBackend {
    tenants: Arc<RwLock<HashMap<TenantId, Tenant>>>,
    codes: Arc<RwLock<HashMap<String, TenantId>>>,
    memberships: Arc<RwLock<MembershipRows>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryTenancyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision a tenant (stands in for the out-of-band provisioning flow)
    pub fn seed_tenant(&self, tenant: Tenant) {
        self.codes.write().insert(tenant.code.clone(), tenant.id.clone());
        self.tenants.write().insert(tenant.id.clone(), tenant);
    }

    /// Insert a membership row directly, bypassing admin checks (test helper)
    pub fn seed_membership(&self, membership: TenantMembership) {
        let key = (membership.tenant_id.clone(), membership.user_id.clone());
        self.memberships.write().insert(key, membership);
    }

    /// Simulate a transport outage: every call fails with `Retryable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> TenancyResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TenancyError::retryable("tenancy backend unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl TenantBackend for MemoryTenancyBackend {
    async fn fetch_by_code(&self, code: &str) -> TenancyResult<Option<Tenant>> {
        self.ensure_available()?;
        let id = match self.codes.read().get(code) {
            Some(id) => id.clone(),
            None => return Ok(None),
        };
        Ok(self.tenants.read().get(&id).cloned())
    }

    async fn fetch_by_id(&self, id: &TenantId) -> TenancyResult<Option<Tenant>> {
        self.ensure_available()?;
        Ok(self.tenants.read().get(id).cloned())
    }

    async fn update_tenant(&self, id: &TenantId, patch: &TenantProfilePatch) -> TenancyResult<Tenant> {
        self.ensure_available()?;
        let mut tenants = self.tenants.write();
        let tenant = tenants
            .get_mut(id)
            .ok_or_else(|| TenancyError::not_found(format!("tenant {id}")))?;
        patch.apply(tenant);
        Ok(tenant.clone())
    }
}

#[async_trait]
impl MembershipBackend for MemoryTenancyBackend {
    async fn fetch_membership(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
    ) -> TenancyResult<Option<TenantMembership>> {
        self.ensure_available()?;
        let key = (tenant_id.clone(), user_id.clone());
        Ok(self.memberships.read().get(&key).cloned())
    }

    async fn memberships_for_tenant(&self, tenant_id: &TenantId) -> TenancyResult<Vec<TenantMembership>> {
        self.ensure_available()?;
        let mut rows: Vec<_> = self
            .memberships
            .read()
            .values()
            .filter(|m| &m.tenant_id == tenant_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(rows)
    }

    async fn memberships_for_user(&self, user_id: &UserId) -> TenancyResult<Vec<TenantMembership>> {
        self.ensure_available()?;
        let mut rows: Vec<_> = self
            .memberships
            .read()
            .values()
            .filter(|m| &m.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        Ok(rows)
    }

    async fn insert_membership(&self, membership: TenantMembership) -> TenancyResult<TenantMembership> {
        self.ensure_available()?;
        let key = (membership.tenant_id.clone(), membership.user_id.clone());
        let mut rows = self.memberships.write();
        if rows.contains_key(&key) {
            return Err(TenancyError::conflict(format!(
                "user {} is already a member of tenant {}",
                membership.user_id, membership.tenant_id
            )));
        }
        rows.insert(key, membership.clone());
        Ok(membership)
    }

    async fn update_role(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        role: Role,
    ) -> TenancyResult<TenantMembership> {
        self.ensure_available()?;
        let key = (tenant_id.clone(), user_id.clone());
        let mut rows = self.memberships.write();
        let row = rows
            .get_mut(&key)
            .ok_or_else(|| TenancyError::not_found(format!("membership of {user_id} in {tenant_id}")))?;
        row.role = role;
        Ok(row.clone())
    }

    async fn delete_membership(&self, tenant_id: &TenantId, user_id: &UserId) -> TenancyResult<bool> {
        self.ensure_available()?;
        let key = (tenant_id.clone(), user_id.clone());
        Ok(self.memberships.write().remove(&key).is_some())
    }
}
