use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{TenantId, UserId};
use crate::TenancyError;

/// Role of a user inside a tenant.
///
/// Variants are declared in ascending privilege order so the derived `Ord`
/// encodes the hierarchy: `Admin > Board > Member`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Board,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Member, Role::Board, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Board => "board",
            Role::Admin => "admin",
        }
    }

    /// True when this role carries every privilege of `other`
    pub fn includes(self, other: Role) -> bool {
        self >= other
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "member" => Ok(Role::Member),
            "board" => Ok(Role::Board),
            "admin" => Ok(Role::Admin),
            other => Err(TenancyError::invalid(format!("unknown role: {other}"))),
        }
    }
}

/// The (user, tenant, role) relation. `(tenant_id, user_id)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMembership {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: Role,
    pub invited_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl TenantMembership {
    pub fn new(tenant_id: TenantId, user_id: UserId, role: Role) -> Self {
        Self {
            tenant_id,
            user_id,
            role,
            invited_by: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_invited_by(mut self, inviter: UserId) -> Self {
        self.invited_by = Some(inviter);
        self
    }
}
