//! Access control evaluation.
//!
//! The evaluator is the trust boundary for every tenant-scoped operation. It
//! only accepts a [`ServiceMembershipLookup`]: the actor being verified has
//! not been verified yet, so its own caller-scoped view cannot be used to
//! decide its access.
//!
//! Any lookup failure is a denial.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{
    membership::ServiceMembershipLookup,
    permissions::{has_permission, Permission},
    Role, TenancyError, TenancyResult, TenantId, TenantMembership, UserId,
};

/// Outcome of an access check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessDecision {
    pub has_access: bool,
    pub role: Option<Role>,
}

impl AccessDecision {
    pub fn denied() -> Self {
        Self::default()
    }

    pub fn granted(role: Role) -> Self {
        Self {
            has_access: true,
            role: Some(role),
        }
    }

    /// Whether the decision carries at least `min_role`
    pub fn allows(&self, min_role: Role) -> bool {
        self.has_access && self.role.is_some_and(|role| role.includes(min_role))
    }

    pub fn is_admin(&self) -> bool {
        self.has_access && self.role == Some(Role::Admin)
    }

    pub fn is_board_or_above(&self) -> bool {
        self.allows(Role::Board)
    }

    pub fn can(&self, permission: Permission) -> bool {
        self.has_access && self.role.is_some_and(|role| has_permission(role, permission))
    }
}

/// Pure decision over an (optional) membership row
pub fn decide(membership: Option<&TenantMembership>) -> AccessDecision {
    match membership {
        Some(m) => AccessDecision::granted(m.role),
        None => AccessDecision::denied(),
    }
}

/// Proof that `user_id` held at least some role in `tenant_id` when checked.
///
/// Only the evaluator can construct one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    tenant_id: TenantId,
    user_id: UserId,
    role: Role,
}

impl AccessGrant {
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn role(&self) -> Role {
        self.role
    }
}

/// Proof of tenant-admin role, required by membership and profile writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminGrant(AccessGrant);

impl AdminGrant {
    pub fn tenant_id(&self) -> &TenantId {
        self.0.tenant_id()
    }

    pub fn user_id(&self) -> &UserId {
        self.0.user_id()
    }

    pub fn as_access(&self) -> &AccessGrant {
        &self.0
    }
}

/// Evaluates (user, tenant) access through the service-level membership path
#[derive(Clone)]
pub struct AccessEvaluator {
    lookup: Arc<dyn ServiceMembershipLookup>,
}

impl AccessEvaluator {
    pub fn new(lookup: Arc<dyn ServiceMembershipLookup>) -> Self {
        Self { lookup }
    }

    /// Check whether `user_id` belongs to `tenant_id`. Fails closed.
    #[instrument(skip_all, fields(user_id = %user_id, tenant_id = %tenant_id))]
    pub async fn verify_access(&self, user_id: &UserId, tenant_id: &TenantId) -> AccessDecision {
        match self.lookup.get_membership(user_id, tenant_id).await {
            Ok(membership) => {
                let decision = decide(membership.as_ref());
                debug!(has_access = decision.has_access, role = ?decision.role, "access evaluated");
                decision
            }
            Err(e) => {
                warn!("membership lookup failed, denying access: {}", e);
                AccessDecision::denied()
            }
        }
    }

    pub async fn is_admin(&self, user_id: &UserId, tenant_id: &TenantId) -> bool {
        self.verify_access(user_id, tenant_id).await.is_admin()
    }

    pub async fn is_board_or_above(&self, user_id: &UserId, tenant_id: &TenantId) -> bool {
        self.verify_access(user_id, tenant_id).await.is_board_or_above()
    }

    pub async fn can(&self, user_id: &UserId, tenant_id: &TenantId, permission: Permission) -> bool {
        self.verify_access(user_id, tenant_id).await.can(permission)
    }

    /// Require at least `min_role`, returning a grant on success
    pub async fn require(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        min_role: Role,
    ) -> TenancyResult<AccessGrant> {
        let decision = self.verify_access(user_id, tenant_id).await;
        match decision.role {
            Some(role) if decision.allows(min_role) => Ok(AccessGrant {
                tenant_id: tenant_id.clone(),
                user_id: user_id.clone(),
                role,
            }),
            _ => Err(TenancyError::permission_denied(format!(
                "user {user_id} lacks {min_role} access to tenant {tenant_id}"
            ))),
        }
    }

    pub async fn require_admin(&self, user_id: &UserId, tenant_id: &TenantId) -> TenancyResult<AdminGrant> {
        self.require(user_id, tenant_id, Role::Admin).await.map(AdminGrant)
    }

    pub async fn require_permission(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        permission: Permission,
    ) -> TenancyResult<AccessGrant> {
        self.require(user_id, tenant_id, permission.minimum_role())
            .await
            .map_err(|_| {
                TenancyError::permission_denied(format!(
                    "user {user_id} lacks {permission} in tenant {tenant_id}"
                ))
            })
    }
}
