//! Authorization engine (application-level orchestration).
//!
//! The engine composes the pure building blocks from `orgdesk-auth` (password
//! hashing, session signing, access policy) with an [`AuthStore`]. It holds no
//! row data between calls: every decision is made from the current persisted
//! state.
//!
//! ## Caller resolution
//!
//! Privileged operations take the caller as a [`Principal`], but the engine
//! re-reads the caller's row before checking privileges. A token minted
//! before a demotion therefore cannot be used to act as an admin.
//!
//! ## Blocking work
//!
//! bcrypt is CPU-bound by construction. Hashing and verification run on
//! tokio's blocking pool so they never stall other requests' I/O.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use orgdesk_auth::authorize::{
    authorize_user_read, authorize_user_update, decide_page_access, effective_pages, require_admin,
};
use orgdesk_auth::{
    AuthzError, CoarsePermission, NewUser, Page, PageSet, PasswordError, PasswordHasher,
    Principal, Role, RoleDraft, RolePatch, RoleWithGrants, SessionError,
    SessionSigner, User, UserPatch, UserRecord, normalize_email, validate_password,
};
use orgdesk_core::{DomainError, RoleId, UserId};

use crate::store::{AuthStore, RoleDeletePolicy, RoleDeletion, StoreError};

/// Engine-level error.
///
/// Each variant is one outcome callers are expected to branch on; the HTTP
/// layer maps them to status codes one-to-one.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown email or wrong password; deliberately indistinguishable.
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("authentication required")]
    Unauthenticated,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found")]
    NotFound,

    /// Store unavailable or failing; the operation may be retried.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DomainError> for AuthError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => AuthError::Validation(msg),
        }
    }
}

impl From<AuthzError> for AuthError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::Forbidden(msg) => AuthError::PermissionDenied(msg),
        }
    }
}

impl From<PasswordError> for AuthError {
    fn from(value: PasswordError) -> Self {
        AuthError::Internal(value.to_string())
    }
}

/// Result of a successful sign-in.
#[derive(Debug, Clone, Serialize)]
pub struct SignedIn {
    pub user: User,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Admin-provisioned account.
#[derive(Clone)]
pub struct Invitation {
    pub email: String,
    pub password: String,
    pub permission: CoarsePermission,
    pub role_id: Option<RoleId>,
}

impl core::fmt::Debug for Invitation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Invitation")
            .field("email", &self.email)
            .field("permission", &self.permission)
            .field("role_id", &self.role_id)
            .finish_non_exhaustive()
    }
}

/// Authentication and authorization orchestrator.
///
/// Generic over the store so tests run against `InMemoryStore` and the
/// service runs against Postgres (or `Arc<dyn AuthStore>` when chosen at
/// runtime).
#[derive(Debug)]
pub struct AuthEngine<S> {
    store: S,
    signer: SessionSigner,
    hasher: Arc<PasswordHasher>,
    delete_policy: RoleDeletePolicy,
}

impl<S> AuthEngine<S> {
    pub fn new(store: S, signer: SessionSigner, hasher: PasswordHasher) -> Self {
        Self {
            store,
            signer,
            hasher: Arc::new(hasher),
            delete_policy: RoleDeletePolicy::default(),
        }
    }

    pub fn with_delete_policy(mut self, policy: RoleDeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: AuthStore> AuthEngine<S> {
    // ---- credentials ----

    /// Register a new account with the `user` permission and no role.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = normalize_email(email)?;
        validate_password(password)?;

        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(AuthError::AlreadyExists("email already registered".to_string()));
        }

        let secret_hash = self.hash_password(password).await?;
        let record = self
            .store
            .insert_user(NewUser {
                id: UserId::new(),
                email,
                secret_hash,
                permission: CoarsePermission::User,
                role_id: None,
            })
            .await
            .map_err(email_taken)?;

        tracing::info!(user_id = %record.id, "account registered");
        Ok(record.into())
    }

    /// Check credentials and mint a session token.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SignedIn, AuthError> {
        let record = match normalize_email(email) {
            Ok(email) => self.store.find_user_by_email(&email).await?,
            Err(_) => None,
        };

        let digest = record.as_ref().map(|r| r.secret_hash.clone());
        if !self.verify_password(password, digest).await? {
            tracing::info!("sign-in rejected");
            return Err(AuthError::InvalidCredentials);
        }
        let Some(record) = record else {
            return Err(AuthError::InvalidCredentials);
        };

        let issued = self
            .signer
            .issue(record.id, &record.email, record.permission)
            .map_err(|e| AuthError::Internal(e.to_string()))?;

        tracing::info!(user_id = %record.id, "signed in");
        Ok(SignedIn {
            expires_at: issued.claims.expires_at(),
            token: issued.token,
            user: record.into(),
        })
    }

    /// Verify a session token and resolve the caller from the store.
    ///
    /// Identity and permission come from the current row, not the token.
    pub async fn verify_session(&self, token: &str) -> Result<Principal, AuthError> {
        self.verify_session_at(token, Utc::now()).await
    }

    pub async fn verify_session_at(&self, token: &str, now: DateTime<Utc>) -> Result<Principal, AuthError> {
        let claims = self.signer.verify_at(token, now).map_err(|e| {
            match e {
                SessionError::Window(reason) => tracing::debug!(%reason, "session outside validity window"),
                other => tracing::debug!(error = %other, "session token rejected"),
            }
            AuthError::Unauthenticated
        })?;

        match self.store.find_user(claims.sub).await? {
            Some(record) => Ok(principal_of(&record)),
            None => {
                tracing::debug!(user_id = %claims.sub, "session for deleted account");
                Err(AuthError::Unauthenticated)
            }
        }
    }

    // ---- page access ----

    /// Whether `user` may reach `page`, from the current persisted state.
    ///
    /// Store failures deny and are logged; this never errors.
    pub async fn check_page_access(&self, user: &Principal, page: Page) -> bool {
        match self.resolve_access(user.user_id).await {
            Ok(Some((permission, grants))) => {
                let decision = decide_page_access(permission, grants.as_ref(), page);
                tracing::debug!(user_id = %user.user_id, page = %page, allowed = decision.allowed, reason = ?decision.reason, "page access");
                decision.allowed
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(user_id = %user.user_id, page = %page, error = %e, "page access denied: store failure");
                false
            }
        }
    }

    /// Every page `user` may reach, by the same rule as [`Self::check_page_access`].
    pub async fn allowed_pages(&self, user: &Principal) -> PageSet {
        match self.resolve_access(user.user_id).await {
            Ok(Some((permission, grants))) => effective_pages(permission, grants.as_ref()),
            Ok(None) => PageSet::new(),
            Err(e) => {
                tracing::warn!(user_id = %user.user_id, error = %e, "allowed pages empty: store failure");
                PageSet::new()
            }
        }
    }

    /// Current permission and role grant set; `None` when the user is gone.
    async fn resolve_access(
        &self,
        user_id: UserId,
    ) -> Result<Option<(CoarsePermission, Option<PageSet>)>, StoreError> {
        let Some(record) = self.store.find_user(user_id).await? else {
            return Ok(None);
        };
        if record.permission.is_admin() {
            return Ok(Some((record.permission, None)));
        }
        let grants = match record.role_id {
            Some(role_id) => self.store.role_grants(role_id).await?,
            None => None,
        };
        Ok(Some((record.permission, grants)))
    }

    // ---- users ----

    pub async fn get_user(&self, caller: &Principal, id: UserId) -> Result<User, AuthError> {
        let caller = self.current_caller(caller).await?;
        authorize_user_read(&caller, id)?;

        self.store
            .find_user(id)
            .await?
            .map(User::from)
            .ok_or(AuthError::NotFound)
    }

    pub async fn list_users(&self, caller: &Principal) -> Result<Vec<User>, AuthError> {
        let caller = self.current_caller(caller).await?;
        require_admin(&caller)?;

        let users = self.store.list_users().await?;
        Ok(users.into_iter().map(User::from).collect())
    }

    /// Apply a partial update to `target`.
    ///
    /// Non-admins may only change their own email.
    pub async fn update_user(&self, caller: &Principal, target: UserId, patch: UserPatch) -> Result<User, AuthError> {
        let caller = self.current_caller(caller).await?;
        authorize_user_update(&caller, target, &patch)?;
        let patch = patch.validated()?;

        if patch.is_empty() {
            return self
                .store
                .find_user(target)
                .await?
                .map(User::from)
                .ok_or(AuthError::NotFound);
        }

        let updated = self
            .store
            .update_user(target, &patch)
            .await
            .map_err(user_write_failed)?
            .ok_or(AuthError::NotFound)?;

        tracing::info!(
            caller = %caller.user_id,
            user_id = %target,
            email_changed = patch.email.is_some(),
            role_changed = patch.role_id.is_some(),
            permission_changed = patch.permission.is_some(),
            "user updated"
        );
        Ok(updated.into())
    }

    /// Provision an account on someone else's behalf (admin only).
    pub async fn invite_user(&self, caller: &Principal, invitation: Invitation) -> Result<User, AuthError> {
        let caller = self.current_caller(caller).await?;
        require_admin(&caller)?;

        let email = normalize_email(&invitation.email)?;
        validate_password(&invitation.password)?;

        let secret_hash = self.hash_password(&invitation.password).await?;
        let record = self
            .store
            .insert_user(NewUser {
                id: UserId::new(),
                email,
                secret_hash,
                permission: invitation.permission,
                role_id: invitation.role_id,
            })
            .await
            .map_err(user_write_failed)?;

        tracing::info!(caller = %caller.user_id, user_id = %record.id, "user invited");
        Ok(record.into())
    }

    /// Remove an account (admin only). Admins cannot remove themselves.
    pub async fn delete_user(&self, caller: &Principal, target: UserId) -> Result<(), AuthError> {
        let caller = self.current_caller(caller).await?;
        require_admin(&caller)?;

        if caller.user_id == target {
            return Err(AuthError::Validation("cannot delete your own account".to_string()));
        }
        if !self.store.delete_user(target).await? {
            return Err(AuthError::NotFound);
        }

        tracing::info!(caller = %caller.user_id, user_id = %target, "user deleted");
        Ok(())
    }

    // ---- roles ----

    pub async fn get_role(&self, id: RoleId) -> Result<RoleWithGrants, AuthError> {
        self.store.find_role(id).await?.ok_or(AuthError::NotFound)
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>, AuthError> {
        Ok(self.store.list_roles().await?)
    }

    /// Create a role together with its grant set (admin only).
    pub async fn create_role(&self, caller: &Principal, draft: RoleDraft) -> Result<RoleWithGrants, AuthError> {
        let caller = self.current_caller(caller).await?;
        require_admin(&caller)?;

        let role = self
            .store
            .create_role(&draft)
            .await
            .map_err(|e| name_taken(e, &draft.name))?;

        tracing::info!(caller = %caller.user_id, role_id = %role.role.id, pages = role.pages.len(), "role created");
        Ok(role)
    }

    /// Update role attributes and/or replace its grant set (admin only).
    pub async fn update_role(&self, caller: &Principal, id: RoleId, patch: RolePatch) -> Result<RoleWithGrants, AuthError> {
        let caller = self.current_caller(caller).await?;
        require_admin(&caller)?;
        let patch = patch.validated()?;

        if patch.is_empty() {
            return self.get_role(id).await;
        }

        let name = patch.name.clone().unwrap_or_default();
        let role = self
            .store
            .update_role(id, &patch)
            .await
            .map_err(|e| name_taken(e, &name))?
            .ok_or(AuthError::NotFound)?;

        tracing::info!(
            caller = %caller.user_id,
            role_id = %id,
            grants_replaced = patch.pages.is_some(),
            status = %role.role.status,
            "role updated"
        );
        Ok(role)
    }

    /// Delete a role under the configured [`RoleDeletePolicy`] (admin only).
    pub async fn delete_role(&self, caller: &Principal, id: RoleId) -> Result<(), AuthError> {
        let caller = self.current_caller(caller).await?;
        require_admin(&caller)?;

        match self.store.delete_role(id, self.delete_policy).await? {
            RoleDeletion::Deleted { detached_users } => {
                tracing::info!(caller = %caller.user_id, role_id = %id, detached_users, "role deleted");
                Ok(())
            }
            RoleDeletion::Referenced { users } => Err(AuthError::Conflict(format!(
                "role is still assigned to {users} user(s)"
            ))),
            RoleDeletion::NotFound => Err(AuthError::NotFound),
        }
    }

    // ---- helpers ----

    /// Re-read the caller so privilege checks use the current row.
    async fn current_caller(&self, caller: &Principal) -> Result<Principal, AuthError> {
        match self.store.find_user(caller.user_id).await? {
            Some(record) => Ok(principal_of(&record)),
            None => Err(AuthError::Unauthenticated),
        }
    }

    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("hashing task failed: {e}")))?
            .map_err(AuthError::from)
    }

    /// Verify against `digest`, or against the dummy digest when there is no
    /// account, so both paths cost one bcrypt verification.
    async fn verify_password(&self, password: &str, digest: Option<String>) -> Result<bool, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_string();
        tokio::task::spawn_blocking(move || match digest {
            Some(digest) => hasher.verify(&password, &digest),
            None => hasher.verify_dummy(&password),
        })
        .await
        .map_err(|e| AuthError::Internal(format!("verification task failed: {e}")))
    }
}

fn principal_of(record: &UserRecord) -> Principal {
    Principal {
        user_id: record.id,
        email: record.email.clone(),
        permission: record.permission,
        role_id: record.role_id,
    }
}

fn email_taken(e: StoreError) -> AuthError {
    match e {
        StoreError::Duplicate(_) => AuthError::AlreadyExists("email already registered".to_string()),
        other => AuthError::Store(other),
    }
}

/// Only existing, active roles may be newly assigned; the store checks both
/// in the same write that stores the assignment.
fn user_write_failed(e: StoreError) -> AuthError {
    match e {
        StoreError::Referenced(_) => AuthError::Validation("role does not exist".to_string()),
        StoreError::Inactive(name) => {
            AuthError::Validation(format!("role '{name}' is inactive and cannot be assigned"))
        }
        other => email_taken(other),
    }
}

fn name_taken(e: StoreError, name: &str) -> AuthError {
    match e {
        StoreError::Duplicate(_) => AuthError::Conflict(format!("role name '{name}' is already in use")),
        other => AuthError::Store(other),
    }
}
