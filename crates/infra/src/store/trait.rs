use std::sync::Arc;

use thiserror::Error;

use orgdesk_auth::{NewUser, PageSet, Role, RoleDraft, RolePatch, RoleWithGrants, UserPatch, UserRecord};
use orgdesk_core::{RoleId, UserId};

/// Persistent-store failure.
///
/// Uniqueness and reference violations are classified so the engine can turn
/// them into domain outcomes; everything else is `Backend` (retryable).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A unique constraint rejected the write (named by constraint/column).
    #[error("duplicate value for {0}")]
    Duplicate(String),

    /// A foreign key rejected the write or delete.
    #[error("referenced by other rows: {0}")]
    Referenced(String),

    /// The referenced role exists but is inactive, so it cannot be newly
    /// assigned (named by role).
    #[error("role is inactive: {0}")]
    Inactive(String),

    /// A row could not be decoded into a domain value.
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// What to do with users still pointing at a role that is being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoleDeletePolicy {
    /// Refuse the delete while any user references the role.
    #[default]
    Restrict,
    /// Clear `role_id` on referencing users in the same atomic operation.
    Detach,
}

/// Outcome of a role delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleDeletion {
    /// Role removed; `detached_users` users lost their reference.
    Deleted { detached_users: u64 },
    /// Refused under [`RoleDeletePolicy::Restrict`]; nothing changed.
    Referenced { users: u64 },
    NotFound,
}

/// User identity + secret material.
///
/// Email uniqueness must be enforced by the store itself (not only by a prior
/// lookup) so that concurrent inserts of the same email cannot both succeed.
/// Likewise a role assignment checks the role is active within the same write
/// that stores it, so a concurrent deactivation is ordered before or after it.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    async fn insert_user(&self, user: NewUser) -> Result<UserRecord, StoreError>;

    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError>;

    /// Lookup by normalized (lowercase) email.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;

    /// All users ordered by email.
    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError>;

    /// Apply a validated patch. `Ok(None)` when the user does not exist.
    async fn update_user(&self, id: UserId, patch: &UserPatch) -> Result<Option<UserRecord>, StoreError>;

    /// Returns whether a row was deleted.
    async fn delete_user(&self, id: UserId) -> Result<bool, StoreError>;
}

/// Roles and their page grants.
///
/// A role's attributes and grant set are always written as one atomic unit;
/// readers observe either the complete previous state or the complete new one.
#[async_trait::async_trait]
pub trait RoleRegistry: Send + Sync {
    async fn create_role(&self, draft: &RoleDraft) -> Result<RoleWithGrants, StoreError>;

    /// Apply a validated patch; a present page set replaces the grants
    /// (delete-then-insert in one transaction). `Ok(None)` when absent.
    async fn update_role(&self, id: RoleId, patch: &RolePatch) -> Result<Option<RoleWithGrants>, StoreError>;

    async fn delete_role(&self, id: RoleId, policy: RoleDeletePolicy) -> Result<RoleDeletion, StoreError>;

    async fn find_role(&self, id: RoleId) -> Result<Option<RoleWithGrants>, StoreError>;

    /// All roles ordered by name.
    async fn list_roles(&self) -> Result<Vec<Role>, StoreError>;

    /// Current grant set of a role; `Ok(None)` when the role does not exist.
    async fn role_grants(&self, id: RoleId) -> Result<Option<PageSet>, StoreError>;
}

/// Everything the authorization engine needs from persistence.
pub trait AuthStore: CredentialStore + RoleRegistry {}

impl<T> AuthStore for T where T: CredentialStore + RoleRegistry + ?Sized {}

#[async_trait::async_trait]
impl<S> CredentialStore for Arc<S>
where
    S: CredentialStore + ?Sized,
{
    async fn insert_user(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        (**self).insert_user(user).await
    }

    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        (**self).find_user(id).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        (**self).find_user_by_email(email).await
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        (**self).list_users().await
    }

    async fn update_user(&self, id: UserId, patch: &UserPatch) -> Result<Option<UserRecord>, StoreError> {
        (**self).update_user(id, patch).await
    }

    async fn delete_user(&self, id: UserId) -> Result<bool, StoreError> {
        (**self).delete_user(id).await
    }
}

#[async_trait::async_trait]
impl<S> RoleRegistry for Arc<S>
where
    S: RoleRegistry + ?Sized,
{
    async fn create_role(&self, draft: &RoleDraft) -> Result<RoleWithGrants, StoreError> {
        (**self).create_role(draft).await
    }

    async fn update_role(&self, id: RoleId, patch: &RolePatch) -> Result<Option<RoleWithGrants>, StoreError> {
        (**self).update_role(id, patch).await
    }

    async fn delete_role(&self, id: RoleId, policy: RoleDeletePolicy) -> Result<RoleDeletion, StoreError> {
        (**self).delete_role(id, policy).await
    }

    async fn find_role(&self, id: RoleId) -> Result<Option<RoleWithGrants>, StoreError> {
        (**self).find_role(id).await
    }

    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        (**self).list_roles().await
    }

    async fn role_grants(&self, id: RoleId) -> Result<Option<PageSet>, StoreError> {
        (**self).role_grants(id).await
    }
}
