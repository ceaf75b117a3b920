//! # dog-tenancy: tenant isolation and role-based access for DogRS
//!
//! Three layers, leaf to top:
//!
//! - **[`TenantDirectory`]** resolves tenants by code or id and produces the
//!   field-filtered [`PublicTenantView`] for unauthenticated callers.
//! - **[`MembershipStore`]** owns the (user, tenant) → [`Role`] relation. Reads
//!   are split into the service-level [`ServiceMembershipLookup`] and the
//!   caller-filtered [`CallerScopedMemberships`].
//! - **[`AccessEvaluator`]** decides access from the service-level path only and
//!   fails closed on any lookup error.
//!
//! ```rust
//! use std::sync::Arc;
//! use dog_tenancy::prelude::*;
//! use dog_tenancy::backend::memory::MemoryTenancyBackend;
//!
//! # tokio_test::block_on(async {
//! let backend = Arc::new(MemoryTenancyBackend::new());
//! backend.seed_membership(TenantMembership::new("t1".into(), "alice".into(), Role::Admin));
//!
//! let store = Arc::new(MembershipStore::new(backend.clone()));
//! let evaluator = AccessEvaluator::new(store.clone());
//!
//! assert!(evaluator.is_admin(&"alice".into(), &"t1".into()).await);
//! assert!(!evaluator.verify_access(&"bob".into(), &"t1".into()).await.has_access);
//! # });
//! ```

pub mod access;
pub mod backend;
pub mod directory;
pub mod error;
pub mod membership;
pub mod permissions;
pub mod rate_limit;
pub mod types;

pub use access::{decide, AccessDecision, AccessEvaluator, AccessGrant, AdminGrant};
pub use directory::TenantDirectory;
pub use error::{TenancyError, TenancyResult};
pub use membership::{CallerScopedMemberships, MembershipStore, ServiceMembershipLookup};
pub use permissions::{has_all_permissions, has_any_permission, has_permission, Permission};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use types::{
    PublicTenantView, Role, Tenant, TenantId, TenantMembership, TenantProfile, TenantProfilePatch,
    UserId,
};

pub mod prelude {
    pub use crate::{
        AccessDecision, AccessEvaluator, MembershipStore, Permission, Role, ServiceMembershipLookup,
        TenancyError, TenancyResult, TenantDirectory, TenantId, TenantMembership, UserId,
    };
}
