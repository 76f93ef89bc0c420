use serde::{Deserialize, Deserializer, Serialize};

use orgdesk_auth::{
    CoarsePermission, Page, PageSet, RoleDraft, RolePatch, RoleStatus, parse_page_set,
};
use orgdesk_core::{DomainError, RoleId};
use orgdesk_infra::Invitation;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct InviteUserRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub permission: CoarsePermission,
    #[serde(default)]
    pub role_id: Option<RoleId>,
}

impl From<InviteUserRequest> for Invitation {
    fn from(body: InviteUserRequest) -> Self {
        Invitation {
            email: body.email,
            password: body.password,
            permission: body.permission,
            role_id: body.role_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: RoleStatus,
    #[serde(default)]
    pub pages: Vec<String>,
}

impl CreateRoleRequest {
    pub fn into_draft(self) -> Result<RoleDraft, DomainError> {
        let pages = parse_page_set(&self.pages)?;
        RoleDraft::new(&self.name, self.description.as_deref(), self.status, pages)
    }
}

/// Absent fields stay unchanged; `"description": null` clears the
/// description; `"pages": []` revokes every grant.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateRoleRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub status: Option<RoleStatus>,
    #[serde(default)]
    pub pages: Option<Vec<String>>,
}

impl UpdateRoleRequest {
    pub fn into_patch(self) -> Result<RolePatch, DomainError> {
        let pages = self.pages.as_deref().map(parse_page_set).transpose()?;
        Ok(RolePatch {
            name: self.name,
            description: self.description,
            status: self.status,
            pages,
        })
    }
}

/// Marks a field as present even when its value is `null`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PageView {
    pub id: Page,
    pub label: &'static str,
}

pub fn page_views(pages: &PageSet) -> Vec<PageView> {
    pages
        .iter()
        .map(|page| PageView {
            id: *page,
            label: page.label(),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct PageAccessResponse {
    pub page: Page,
    pub allowed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_role_distinguishes_null_from_absent() {
        let cleared: UpdateRoleRequest = serde_json::from_str(r#"{"description": null}"#).unwrap();
        assert_eq!(cleared.description, Some(None));

        let untouched: UpdateRoleRequest = serde_json::from_str(r#"{"name": "Viewer"}"#).unwrap();
        assert_eq!(untouched.description, None);
        assert_eq!(untouched.into_patch().unwrap().pages, None);
    }

    #[test]
    fn empty_page_list_revokes_everything() {
        let body: UpdateRoleRequest = serde_json::from_str(r#"{"pages": []}"#).unwrap();
        assert_eq!(body.into_patch().unwrap().pages, Some(PageSet::new()));
    }

    #[test]
    fn unknown_page_is_a_validation_error() {
        let body: CreateRoleRequest =
            serde_json::from_str(r#"{"name": "Viewer", "pages": ["companies", "billing"]}"#).unwrap();
        assert!(matches!(body.into_draft(), Err(DomainError::Validation(_))));
    }
}
