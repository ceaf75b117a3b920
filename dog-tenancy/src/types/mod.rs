pub mod ids;
pub mod membership;
pub mod tenant;

pub use ids::{TenantId, UserId};
pub use membership::{Role, TenantMembership};
pub use tenant::{PublicTenantView, Tenant, TenantProfile, TenantProfilePatch};
