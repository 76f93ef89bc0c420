//! Roles: named, reusable bundles of page grants.
//!
//! These are plain records plus validated inputs. Persistence (and the
//! atomic replacement of grant sets) lives in the infra layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orgdesk_core::{DomainError, RoleId};

use crate::pages::PageSet;

const MAX_NAME_LEN: usize = 100;

/// Role lifecycle status. `Active ⇄ Inactive` is the only transition.
///
/// An inactive role keeps its grants; it just may not be assigned to users
/// going forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoleStatus {
    #[default]
    Active,
    Inactive,
}

impl RoleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleStatus::Active => "active",
            RoleStatus::Inactive => "inactive",
        }
    }
}

impl core::fmt::Display for RoleStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for RoleStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(RoleStatus::Active),
            "inactive" => Ok(RoleStatus::Inactive),
            other => Err(DomainError::validation(format!(
                "status must be 'active' or 'inactive', got '{other}'"
            ))),
        }
    }
}

/// Persisted role attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub description: Option<String>,
    pub status: RoleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A role together with its current grant set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleWithGrants {
    #[serde(flatten)]
    pub role: Role,
    pub pages: PageSet,
}

/// Validated input for creating a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDraft {
    pub name: String,
    pub description: Option<String>,
    pub status: RoleStatus,
    pub pages: PageSet,
}

impl RoleDraft {
    pub fn new(
        name: &str,
        description: Option<&str>,
        status: RoleStatus,
        pages: PageSet,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            name: normalize_role_name(name)?,
            description: normalize_description(description),
            status,
            pages,
        })
    }
}

/// Partial update of a role.
///
/// `None` leaves a field unchanged. For `description`, `Some(None)` clears it.
/// `pages: Some(set)` replaces the whole grant set (an empty set revokes
/// everything); it is never merged with the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolePatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<RoleStatus>,
    pub pages: Option<PageSet>,
}

impl RolePatch {
    /// Normalize and validate the present fields.
    pub fn validated(self) -> Result<Self, DomainError> {
        Ok(Self {
            name: self.name.as_deref().map(normalize_role_name).transpose()?,
            description: self
                .description
                .map(|d| normalize_description(d.as_deref())),
            status: self.status,
            pages: self.pages,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.pages.is_none()
    }
}

fn normalize_role_name(name: &str) -> Result<String, DomainError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("role name cannot be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(DomainError::validation(format!(
            "role name cannot exceed {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn normalize_description(description: Option<&str>) -> Option<String> {
    description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
}
