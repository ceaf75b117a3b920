use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::{
    access::AdminGrant, backend::TenantBackend, PublicTenantView, TenancyError, TenancyResult,
    Tenant, TenantId, TenantProfilePatch,
};

/// Resolves tenant identity by code or id.
///
/// Reads have no side effects. Backend transport failures surface as
/// `Retryable`, never as `NotFound`.
pub struct TenantDirectory<B: TenantBackend> {
    backend: Arc<B>,
}

impl<B: TenantBackend> TenantDirectory<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    #[instrument(skip(self))]
    pub async fn resolve_by_code(&self, code: &str) -> TenancyResult<Tenant> {
        let code = normalize_code(code)?;
        self.backend
            .fetch_by_code(code)
            .await?
            .ok_or_else(|| TenancyError::not_found(format!("tenant with code {code}")))
    }

    #[instrument(skip(self), fields(tenant_id = %id))]
    pub async fn resolve_by_id(&self, id: &TenantId) -> TenancyResult<Tenant> {
        self.backend
            .fetch_by_id(id)
            .await?
            .ok_or_else(|| TenancyError::not_found(format!("tenant {id}")))
    }

    /// Public projection of a tenant. Private tenants are reported as
    /// `NotFound` so their existence is not disclosed.
    #[instrument(skip(self))]
    pub async fn resolve_public_by_code(&self, code: &str) -> TenancyResult<PublicTenantView> {
        let code = normalize_code(code)?;
        match self.backend.fetch_by_code(code).await? {
            Some(tenant) if tenant.is_public => Ok(tenant.public_view()),
            Some(_) => {
                debug!("tenant {} exists but is not public", code);
                Err(TenancyError::not_found(format!("public tenant with code {code}")))
            }
            None => Err(TenancyError::not_found(format!("public tenant with code {code}"))),
        }
    }

    /// Authorized profile action; requires an admin grant for the tenant
    #[instrument(skip(self, grant, patch), fields(tenant_id = %grant.tenant_id(), actor = %grant.user_id()))]
    pub async fn update_profile(&self, grant: &AdminGrant, patch: &TenantProfilePatch) -> TenancyResult<Tenant> {
        if patch.is_empty() {
            return self.resolve_by_id(grant.tenant_id()).await;
        }
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(TenancyError::invalid("tenant name cannot be blank"));
            }
        }
        let updated = self.backend.update_tenant(grant.tenant_id(), patch).await?;
        info!("Updated profile of tenant {}", updated.code);
        Ok(updated)
    }
}

fn normalize_code(code: &str) -> TenancyResult<&str> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return Err(TenancyError::not_found("tenant code is empty"));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryTenancyBackend;
    use crate::TenantProfile;

    fn directory() -> (TenantDirectory<MemoryTenancyBackend>, MemoryTenancyBackend) {
        let backend = MemoryTenancyBackend::new();
        backend.seed_tenant(Tenant::new("stc-id".into(), "stc", TenantProfile::named("smalltalk")).public());
        backend.seed_tenant(Tenant::new("priv-id".into(), "private-org", TenantProfile::named("hidden")));
        (TenantDirectory::new(Arc::new(backend.clone())), backend)
    }

    #[tokio::test]
    async fn resolves_by_code_and_id() {
        let (dir, _) = directory();
        let by_code = dir.resolve_by_code("stc").await.unwrap();
        let by_id = dir.resolve_by_id(&"stc-id".into()).await.unwrap();
        assert_eq!(by_code, by_id);
    }

    #[tokio::test]
    async fn trims_code_before_lookup() {
        let (dir, _) = directory();
        let view = dir.resolve_public_by_code("  stc  ").await.unwrap();
        assert_eq!(view.code, "stc");
    }

    #[tokio::test]
    async fn blank_code_is_not_found_without_backend_call() {
        let (dir, backend) = directory();
        backend.set_unavailable(true);
        let result = dir.resolve_public_by_code("   ").await;
        assert!(matches!(result, Err(TenancyError::NotFound(_))));
    }

    #[tokio::test]
    async fn private_tenant_has_no_public_view() {
        let (dir, _) = directory();
        let result = dir.resolve_public_by_code("private-org").await;
        assert!(matches!(result, Err(TenancyError::NotFound(_))));
        assert!(dir.resolve_by_code("private-org").await.is_ok());
    }

    #[tokio::test]
    async fn transport_failure_is_retryable_not_missing() {
        let (dir, backend) = directory();
        backend.set_unavailable(true);
        let err = dir.resolve_by_code("stc").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!err.is_not_found());
    }
}
