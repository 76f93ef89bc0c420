use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use orgdesk_auth::{NewUser, PageSet, Role, RoleDraft, RolePatch, RoleStatus, RoleWithGrants, UserPatch, UserRecord};
use orgdesk_core::{RoleId, UserId};

use super::r#trait::{CredentialStore, RoleDeletePolicy, RoleDeletion, RoleRegistry, StoreError};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, UserRecord>,
    roles: HashMap<RoleId, Role>,
    grants: HashMap<RoleId, PageSet>,
}

impl Tables {
    fn email_taken(&self, email: &str, except: Option<UserId>) -> bool {
        self.users
            .values()
            .any(|u| u.email == email && Some(u.id) != except)
    }

    fn role_name_taken(&self, name: &str, except: Option<RoleId>) -> bool {
        self.roles
            .values()
            .any(|r| r.name == name && Some(r.id) != except)
    }

    fn check_assignable(&self, role_id: RoleId) -> Result<(), StoreError> {
        match self.roles.get(&role_id) {
            None => Err(StoreError::Referenced("users.role_id".to_string())),
            Some(role) if role.status == RoleStatus::Inactive => Err(StoreError::Inactive(role.name.clone())),
            Some(_) => Ok(()),
        }
    }

    fn with_grants(&self, role: &Role) -> RoleWithGrants {
        RoleWithGrants {
            role: role.clone(),
            pages: self.grants.get(&role.id).cloned().unwrap_or_default(),
        }
    }
}

/// In-memory credential store and role registry.
///
/// Intended for tests/dev. One lock guards all tables: every mutation runs
/// under a single write guard, so it is atomic and invisible to readers until
/// it completes, and uniqueness checks cannot race with inserts.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl CredentialStore for InMemoryStore {
    async fn insert_user(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let mut tables = self.write()?;

        if tables.email_taken(&user.email, None) {
            return Err(StoreError::Duplicate("users.email".to_string()));
        }
        if let Some(role_id) = user.role_id {
            tables.check_assignable(role_id)?;
        }

        let now = Utc::now();
        let record = UserRecord {
            id: user.id,
            email: user.email,
            secret_hash: user.secret_hash,
            permission: user.permission,
            role_id: user.role_id,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let tables = self.read()?;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let mut users: Vec<UserRecord> = self.read()?.users.values().cloned().collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn update_user(&self, id: UserId, patch: &UserPatch) -> Result<Option<UserRecord>, StoreError> {
        let mut tables = self.write()?;

        if !tables.users.contains_key(&id) {
            return Ok(None);
        }
        if let Some(email) = &patch.email {
            if tables.email_taken(email, Some(id)) {
                return Err(StoreError::Duplicate("users.email".to_string()));
            }
        }
        if let Some(Some(role_id)) = patch.role_id {
            tables.check_assignable(role_id)?;
        }

        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(email) = &patch.email {
            user.email = email.clone();
        }
        if let Some(role_id) = patch.role_id {
            user.role_id = role_id;
        }
        if let Some(permission) = patch.permission {
            user.permission = permission;
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn delete_user(&self, id: UserId) -> Result<bool, StoreError> {
        Ok(self.write()?.users.remove(&id).is_some())
    }
}

#[async_trait::async_trait]
impl RoleRegistry for InMemoryStore {
    async fn create_role(&self, draft: &RoleDraft) -> Result<RoleWithGrants, StoreError> {
        let mut tables = self.write()?;

        if tables.role_name_taken(&draft.name, None) {
            return Err(StoreError::Duplicate("roles.name".to_string()));
        }

        let now = Utc::now();
        let role = Role {
            id: RoleId::new(),
            name: draft.name.clone(),
            description: draft.description.clone(),
            status: draft.status,
            created_at: now,
            updated_at: now,
        };
        tables.grants.insert(role.id, draft.pages.clone());
        tables.roles.insert(role.id, role.clone());

        Ok(RoleWithGrants {
            role,
            pages: draft.pages.clone(),
        })
    }

    async fn update_role(&self, id: RoleId, patch: &RolePatch) -> Result<Option<RoleWithGrants>, StoreError> {
        let mut tables = self.write()?;

        if !tables.roles.contains_key(&id) {
            return Ok(None);
        }
        if let Some(name) = &patch.name {
            if tables.role_name_taken(name, Some(id)) {
                return Err(StoreError::Duplicate("roles.name".to_string()));
            }
        }

        // All checks passed; nothing below can fail, so the write is all-or-nothing.
        let Some(role) = tables.roles.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = &patch.name {
            role.name = name.clone();
        }
        if let Some(description) = &patch.description {
            role.description = description.clone();
        }
        if let Some(status) = patch.status {
            role.status = status;
        }
        role.updated_at = Utc::now();
        let role = role.clone();

        if let Some(pages) = &patch.pages {
            tables.grants.insert(id, pages.clone());
        }

        Ok(Some(tables.with_grants(&role)))
    }

    async fn delete_role(&self, id: RoleId, policy: RoleDeletePolicy) -> Result<RoleDeletion, StoreError> {
        let mut tables = self.write()?;

        if !tables.roles.contains_key(&id) {
            return Ok(RoleDeletion::NotFound);
        }

        let referencing: Vec<UserId> = tables
            .users
            .values()
            .filter(|u| u.role_id == Some(id))
            .map(|u| u.id)
            .collect();

        if !referencing.is_empty() && policy == RoleDeletePolicy::Restrict {
            return Ok(RoleDeletion::Referenced {
                users: referencing.len() as u64,
            });
        }

        let now = Utc::now();
        for user_id in &referencing {
            if let Some(user) = tables.users.get_mut(user_id) {
                user.role_id = None;
                user.updated_at = now;
            }
        }
        tables.grants.remove(&id);
        tables.roles.remove(&id);

        Ok(RoleDeletion::Deleted {
            detached_users: referencing.len() as u64,
        })
    }

    async fn find_role(&self, id: RoleId) -> Result<Option<RoleWithGrants>, StoreError> {
        let tables = self.read()?;
        Ok(tables.roles.get(&id).map(|r| tables.with_grants(r)))
    }

    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        let mut roles: Vec<Role> = self.read()?.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn role_grants(&self, id: RoleId) -> Result<Option<PageSet>, StoreError> {
        let tables = self.read()?;
        if !tables.roles.contains_key(&id) {
            return Ok(None);
        }
        Ok(Some(tables.grants.get(&id).cloned().unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgdesk_auth::{CoarsePermission, Page};

    fn new_user(email: &str) -> NewUser {
        NewUser {
            id: UserId::new(),
            email: email.to_string(),
            secret_hash: "$2b$04$not-a-real-digest".to_string(),
            permission: CoarsePermission::User,
            role_id: None,
        }
    }

    fn draft(name: &str, pages: &[Page]) -> RoleDraft {
        RoleDraft::new(name, None, RoleStatus::Active, pages.iter().copied().collect()).unwrap()
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_by_the_store() {
        let store = InMemoryStore::new();
        store.insert_user(new_user("a@b.io")).await.unwrap();

        let err = store.insert_user(new_user("a@b.io")).await.unwrap_err();
        assert_eq!(err, StoreError::Duplicate("users.email".to_string()));
    }

    #[tokio::test]
    async fn grant_set_is_replaced_not_merged() {
        let store = InMemoryStore::new();
        let role = store
            .create_role(&draft("Viewer", &[Page::Companies, Page::Users]))
            .await
            .unwrap();

        let patch = RolePatch {
            pages: Some(PageSet::from([Page::Users, Page::Settings])),
            ..Default::default()
        };
        let updated = store.update_role(role.role.id, &patch).await.unwrap().unwrap();

        assert_eq!(updated.pages, PageSet::from([Page::Users, Page::Settings]));
        assert_eq!(
            store.role_grants(role.role.id).await.unwrap(),
            Some(PageSet::from([Page::Users, Page::Settings]))
        );
    }

    #[tokio::test]
    async fn failed_update_leaves_attributes_untouched() {
        let store = InMemoryStore::new();
        store.create_role(&draft("Taken", &[])).await.unwrap();
        let role = store.create_role(&draft("Viewer", &[Page::Help])).await.unwrap();

        let patch = RolePatch {
            name: Some("Taken".to_string()),
            status: Some(RoleStatus::Inactive),
            pages: Some(PageSet::new()),
            ..Default::default()
        };
        let err = store.update_role(role.role.id, &patch).await.unwrap_err();
        assert_eq!(err, StoreError::Duplicate("roles.name".to_string()));

        let after = store.find_role(role.role.id).await.unwrap().unwrap();
        assert_eq!(after, role);
    }

    #[tokio::test]
    async fn restrict_policy_refuses_referenced_role() {
        let store = InMemoryStore::new();
        let role = store.create_role(&draft("Viewer", &[Page::Help])).await.unwrap();
        let mut user = new_user("a@b.io");
        user.role_id = Some(role.role.id);
        store.insert_user(user).await.unwrap();

        let outcome = store
            .delete_role(role.role.id, RoleDeletePolicy::Restrict)
            .await
            .unwrap();
        assert_eq!(outcome, RoleDeletion::Referenced { users: 1 });
        assert!(store.find_role(role.role.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn detach_policy_clears_references_with_the_delete() {
        let store = InMemoryStore::new();
        let role = store.create_role(&draft("Viewer", &[Page::Help])).await.unwrap();
        let mut user = new_user("a@b.io");
        user.role_id = Some(role.role.id);
        let user = store.insert_user(user).await.unwrap();

        let outcome = store
            .delete_role(role.role.id, RoleDeletePolicy::Detach)
            .await
            .unwrap();
        assert_eq!(outcome, RoleDeletion::Deleted { detached_users: 1 });
        assert_eq!(store.find_user(user.id).await.unwrap().unwrap().role_id, None);
        assert_eq!(store.role_grants(role.role.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn user_cannot_reference_missing_role() {
        let store = InMemoryStore::new();
        let mut user = new_user("a@b.io");
        user.role_id = Some(RoleId::new());

        let err = store.insert_user(user).await.unwrap_err();
        assert!(matches!(err, StoreError::Referenced(_)));
    }

    #[tokio::test]
    async fn inactive_role_is_refused_inside_the_write() {
        let store = InMemoryStore::new();
        let role = store.create_role(&draft("Viewer", &[Page::Help])).await.unwrap();
        let user = store.insert_user(new_user("a@b.io")).await.unwrap();

        let deactivate = RolePatch {
            status: Some(RoleStatus::Inactive),
            ..Default::default()
        };
        store.update_role(role.role.id, &deactivate).await.unwrap();

        let assign = UserPatch {
            role_id: Some(Some(role.role.id)),
            ..Default::default()
        };
        let err = store.update_user(user.id, &assign).await.unwrap_err();
        assert_eq!(err, StoreError::Inactive("Viewer".to_string()));
        assert_eq!(store.find_user(user.id).await.unwrap().unwrap().role_id, None);

        let mut invited = new_user("c@d.io");
        invited.role_id = Some(role.role.id);
        let err = store.insert_user(invited).await.unwrap_err();
        assert_eq!(err, StoreError::Inactive("Viewer".to_string()));
        assert!(store.find_user_by_email("c@d.io").await.unwrap().is_none());
    }
}
