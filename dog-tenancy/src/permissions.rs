//! Role-based permission catalogue.
//!
//! Each role grants its own permissions plus everything granted to the roles
//! below it, so `permissions_for(Admin) ⊇ permissions_for(Board) ⊇
//! permissions_for(Member)`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Role, TenancyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "crm:view")]
    CrmView,
    #[serde(rename = "crm:edit")]
    CrmEdit,
    #[serde(rename = "crm:delete")]
    CrmDelete,
    #[serde(rename = "crm:export")]
    CrmExport,
    #[serde(rename = "events:view")]
    EventsView,
    #[serde(rename = "events:create")]
    EventsCreate,
    #[serde(rename = "events:edit")]
    EventsEdit,
    #[serde(rename = "events:delete")]
    EventsDelete,
    #[serde(rename = "financial:view")]
    FinancialView,
    #[serde(rename = "financial:edit")]
    FinancialEdit,
    #[serde(rename = "financial:approve")]
    FinancialApprove,
    #[serde(rename = "governance:view")]
    GovernanceView,
    #[serde(rename = "governance:edit")]
    GovernanceEdit,
    #[serde(rename = "governance:admin")]
    GovernanceAdmin,
    #[serde(rename = "settings:view")]
    SettingsView,
    #[serde(rename = "settings:edit")]
    SettingsEdit,
    #[serde(rename = "settings:branding")]
    SettingsBranding,
    #[serde(rename = "members:view")]
    MembersView,
    #[serde(rename = "members:invite")]
    MembersInvite,
    #[serde(rename = "members:manage_roles")]
    MembersManageRoles,
    #[serde(rename = "members:remove")]
    MembersRemove,
    #[serde(rename = "app:access")]
    AppAccess,
    #[serde(rename = "insights:view")]
    InsightsView,
    #[serde(rename = "insights:query")]
    InsightsQuery,
    #[serde(rename = "reports:view")]
    ReportsView,
    #[serde(rename = "reports:export")]
    ReportsExport,
}

const MEMBER_GRANTS: &[Permission] = &[
    Permission::AppAccess,
    Permission::CrmView,
    Permission::EventsView,
    Permission::EventsCreate,
    Permission::InsightsView,
    Permission::ReportsView,
];

const BOARD_GRANTS: &[Permission] = &[
    Permission::CrmEdit,
    Permission::CrmExport,
    Permission::EventsEdit,
    Permission::EventsDelete,
    Permission::FinancialView,
    Permission::GovernanceView,
    Permission::InsightsQuery,
    Permission::ReportsExport,
    Permission::MembersView,
    Permission::MembersInvite,
    Permission::SettingsView,
];

const ADMIN_GRANTS: &[Permission] = &[
    Permission::CrmDelete,
    Permission::FinancialEdit,
    Permission::FinancialApprove,
    Permission::GovernanceEdit,
    Permission::GovernanceAdmin,
    Permission::SettingsEdit,
    Permission::SettingsBranding,
    Permission::MembersManageRoles,
    Permission::MembersRemove,
];

impl Permission {
    pub const ALL: [Permission; 26] = [
        Permission::CrmView,
        Permission::CrmEdit,
        Permission::CrmDelete,
        Permission::CrmExport,
        Permission::EventsView,
        Permission::EventsCreate,
        Permission::EventsEdit,
        Permission::EventsDelete,
        Permission::FinancialView,
        Permission::FinancialEdit,
        Permission::FinancialApprove,
        Permission::GovernanceView,
        Permission::GovernanceEdit,
        Permission::GovernanceAdmin,
        Permission::SettingsView,
        Permission::SettingsEdit,
        Permission::SettingsBranding,
        Permission::MembersView,
        Permission::MembersInvite,
        Permission::MembersManageRoles,
        Permission::MembersRemove,
        Permission::AppAccess,
        Permission::InsightsView,
        Permission::InsightsQuery,
        Permission::ReportsView,
        Permission::ReportsExport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::CrmView => "crm:view",
            Permission::CrmEdit => "crm:edit",
            Permission::CrmDelete => "crm:delete",
            Permission::CrmExport => "crm:export",
            Permission::EventsView => "events:view",
            Permission::EventsCreate => "events:create",
            Permission::EventsEdit => "events:edit",
            Permission::EventsDelete => "events:delete",
            Permission::FinancialView => "financial:view",
            Permission::FinancialEdit => "financial:edit",
            Permission::FinancialApprove => "financial:approve",
            Permission::GovernanceView => "governance:view",
            Permission::GovernanceEdit => "governance:edit",
            Permission::GovernanceAdmin => "governance:admin",
            Permission::SettingsView => "settings:view",
            Permission::SettingsEdit => "settings:edit",
            Permission::SettingsBranding => "settings:branding",
            Permission::MembersView => "members:view",
            Permission::MembersInvite => "members:invite",
            Permission::MembersManageRoles => "members:manage_roles",
            Permission::MembersRemove => "members:remove",
            Permission::AppAccess => "app:access",
            Permission::InsightsView => "insights:view",
            Permission::InsightsQuery => "insights:query",
            Permission::ReportsView => "reports:view",
            Permission::ReportsExport => "reports:export",
        }
    }

    /// Human-readable label for UI listings
    pub fn label(&self) -> &'static str {
        match self {
            Permission::CrmView => "View contacts",
            Permission::CrmEdit => "Edit contacts",
            Permission::CrmDelete => "Delete contacts",
            Permission::CrmExport => "Export contacts",
            Permission::EventsView => "View events",
            Permission::EventsCreate => "Create events",
            Permission::EventsEdit => "Edit events",
            Permission::EventsDelete => "Delete events",
            Permission::FinancialView => "View finances",
            Permission::FinancialEdit => "Edit finances",
            Permission::FinancialApprove => "Approve transactions",
            Permission::GovernanceView => "View governance",
            Permission::GovernanceEdit => "Edit governance",
            Permission::GovernanceAdmin => "Manage governance",
            Permission::SettingsView => "View settings",
            Permission::SettingsEdit => "Edit settings",
            Permission::SettingsBranding => "Manage branding",
            Permission::MembersView => "View members",
            Permission::MembersInvite => "Invite members",
            Permission::MembersManageRoles => "Manage roles",
            Permission::MembersRemove => "Remove members",
            Permission::AppAccess => "Access apps",
            Permission::InsightsView => "View insights",
            Permission::InsightsQuery => "Query AI insights",
            Permission::ReportsView => "View reports",
            Permission::ReportsExport => "Export reports",
        }
    }

    /// Grouping used when listing permissions
    pub fn category(&self) -> &'static str {
        match self {
            Permission::CrmView | Permission::CrmEdit | Permission::CrmDelete | Permission::CrmExport => {
                "CRM & Contacts"
            }
            Permission::EventsView
            | Permission::EventsCreate
            | Permission::EventsEdit
            | Permission::EventsDelete => "Events & Programs",
            Permission::FinancialView | Permission::FinancialEdit | Permission::FinancialApprove => {
                "Financial Management"
            }
            Permission::GovernanceView | Permission::GovernanceEdit | Permission::GovernanceAdmin => {
                "Governance"
            }
            Permission::SettingsView | Permission::SettingsEdit | Permission::SettingsBranding => {
                "Settings"
            }
            Permission::MembersView
            | Permission::MembersInvite
            | Permission::MembersManageRoles
            | Permission::MembersRemove => "Member Management",
            Permission::AppAccess => "General",
            Permission::InsightsView
            | Permission::InsightsQuery
            | Permission::ReportsView
            | Permission::ReportsExport => "Insights & Reports",
        }
    }

    /// The lowest role that holds this permission
    pub fn minimum_role(&self) -> Role {
        if MEMBER_GRANTS.contains(self) {
            Role::Member
        } else if BOARD_GRANTS.contains(self) {
            Role::Board
        } else {
            Role::Admin
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| TenancyError::invalid(format!("unknown permission: {s}")))
    }
}

impl Role {
    /// Permissions granted at exactly this level, excluding inherited ones
    pub fn own_grants(&self) -> &'static [Permission] {
        match self {
            Role::Member => MEMBER_GRANTS,
            Role::Board => BOARD_GRANTS,
            Role::Admin => ADMIN_GRANTS,
        }
    }

    /// All permissions of this role, inherited ones included
    pub fn permissions(&self) -> Vec<Permission> {
        Role::ALL
            .iter()
            .filter(|lower| self.includes(**lower))
            .flat_map(|lower| lower.own_grants().iter().copied())
            .collect()
    }
}

pub fn has_permission(role: Role, permission: Permission) -> bool {
    role.includes(permission.minimum_role())
}

pub fn has_all_permissions(role: Role, permissions: &[Permission]) -> bool {
    permissions.iter().all(|p| has_permission(role, *p))
}

pub fn has_any_permission(role: Role, permissions: &[Permission]) -> bool {
    permissions.iter().any(|p| has_permission(role, *p))
}
