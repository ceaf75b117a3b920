use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::TenantId;

/// Editable profile of a tenant organisation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantProfile {
    pub name: String,
    pub description: Option<String>,
    pub mission_statement: Option<String>,
    pub logo_url: Option<String>,
    pub hero_image_url: Option<String>,
    pub primary_color: Option<String>,
    pub secondary_color: Option<String>,
    pub website: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub address: Option<String>,
    pub social_links: BTreeMap<String, String>,
}

impl TenantProfile {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Canonical tenant record. Only returned to authenticated, authorized callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    /// Unique URL slug, e.g. `stc`
    pub code: String,
    pub is_public: bool,
    pub profile: TenantProfile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(id: TenantId, code: impl Into<String>, profile: TenantProfile) -> Self {
        let now = Utc::now();
        Self {
            id,
            code: code.into(),
            is_public: false,
            profile,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }

    /// Project onto the whitelisted public fields
    pub fn public_view(&self) -> PublicTenantView {
        PublicTenantView {
            id: self.id.clone(),
            code: self.code.clone(),
            name: self.profile.name.clone(),
            description: self.profile.description.clone(),
            mission_statement: self.profile.mission_statement.clone(),
            logo_url: self.profile.logo_url.clone(),
            hero_image_url: self.profile.hero_image_url.clone(),
            primary_color: self.profile.primary_color.clone(),
            secondary_color: self.profile.secondary_color.clone(),
            website: self.profile.website.clone(),
            contact_email: self.profile.contact_email.clone(),
            contact_phone: self.profile.contact_phone.clone(),
            address: self.profile.address.clone(),
            social_links: self.profile.social_links.clone(),
        }
    }
}

/// Field-filtered projection of a public tenant, safe for unauthenticated callers.
///
/// Built only through [`Tenant::public_view`]; lifecycle timestamps and the
/// visibility flag never leave the canonical record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicTenantView {
    pub id: TenantId,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub mission_statement: Option<String>,
    pub logo_url: Option<String>,
    pub hero_image_url: Option<String>,
    pub primary_color: Option<String>,
    pub secondary_color: Option<String>,
    pub website: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub address: Option<String>,
    pub social_links: BTreeMap<String, String>,
}

/// Partial profile update; `None` leaves a field untouched.
///
/// Optional profile fields use `Option<Option<_>>` so a patch can clear them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantProfilePatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub mission_statement: Option<Option<String>>,
    pub logo_url: Option<Option<String>>,
    pub hero_image_url: Option<Option<String>>,
    pub primary_color: Option<Option<String>>,
    pub secondary_color: Option<Option<String>>,
    pub website: Option<Option<String>>,
    pub contact_email: Option<Option<String>>,
    pub contact_phone: Option<Option<String>>,
    pub address: Option<Option<String>>,
    pub social_links: Option<BTreeMap<String, String>>,
    pub is_public: Option<bool>,
}

impl TenantProfilePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the patch in place and bump `updated_at`
    pub fn apply(&self, tenant: &mut Tenant) {
        let profile = &mut tenant.profile;
        if let Some(name) = &self.name {
            profile.name = name.clone();
        }
        let optional_fields = [
            (&self.description, &mut profile.description),
            (&self.mission_statement, &mut profile.mission_statement),
            (&self.logo_url, &mut profile.logo_url),
            (&self.hero_image_url, &mut profile.hero_image_url),
            (&self.primary_color, &mut profile.primary_color),
            (&self.secondary_color, &mut profile.secondary_color),
            (&self.website, &mut profile.website),
            (&self.contact_email, &mut profile.contact_email),
            (&self.contact_phone, &mut profile.contact_phone),
            (&self.address, &mut profile.address),
        ];
        for (patch, field) in optional_fields {
            if let Some(value) = patch {
                *field = value.clone();
            }
        }
        if let Some(links) = &self.social_links {
            profile.social_links = links.clone();
        }
        if let Some(is_public) = self.is_public {
            tenant.is_public = is_public;
        }
        tenant.updated_at = Utc::now();
    }
}
