//! Pure authorization policy.
//!
//! - No IO
//! - No panics
//!
//! Callers resolve the inputs (the caller's current row, a role's current
//! grant set) from the store and pass them in; every decision here is a
//! function of those inputs only.

use serde::Serialize;
use thiserror::Error;

use orgdesk_core::UserId;

use crate::pages::{ALWAYS_ALLOWED, Page, PageSet};
use crate::{CoarsePermission, Principal, UserPatch};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: {0}")]
    Forbidden(String),
}

/// Require the caller to hold the coarse `admin` permission.
pub fn require_admin(caller: &Principal) -> Result<(), AuthzError> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(AuthzError::Forbidden("admin permission required".to_string()))
    }
}

/// Check whether `caller` may apply `patch` to user `target`.
///
/// Admins may update anyone. Everyone else may only change their own email:
/// touching their own role or permission would be self-escalation.
pub fn authorize_user_update(
    caller: &Principal,
    target: UserId,
    patch: &UserPatch,
) -> Result<(), AuthzError> {
    if caller.is_admin() {
        return Ok(());
    }
    if caller.user_id != target {
        return Err(AuthzError::Forbidden(
            "cannot update another user's account".to_string(),
        ));
    }
    if patch.touches_privileges() {
        return Err(AuthzError::Forbidden(
            "cannot change your own role or permission".to_string(),
        ));
    }
    Ok(())
}

/// Admins may read any account; users may read their own.
pub fn authorize_user_read(caller: &Principal, target: UserId) -> Result<(), AuthzError> {
    if caller.is_admin() || caller.user_id == target {
        Ok(())
    } else {
        Err(AuthzError::Forbidden("cannot read another user's account".to_string()))
    }
}

/// Why a page-access decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    /// Coarse admin permission bypasses role checks.
    Admin,
    /// Page belongs to the minimal set every user may reach.
    AlwaysAllowed,
    /// The caller's role grants the page.
    Granted,
    /// The caller has no role; default deny.
    NoRole,
    /// The caller's role does not grant the page.
    NotGranted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub page: Page,
    pub allowed: bool,
    pub reason: AccessReason,
}

/// Decide page access from the caller's coarse permission and the current
/// grant set of their role (`None` when they have no role).
pub fn decide_page_access(
    permission: CoarsePermission,
    role_grants: Option<&PageSet>,
    page: Page,
) -> AccessDecision {
    let (allowed, reason) = if permission.is_admin() {
        (true, AccessReason::Admin)
    } else if page.is_always_allowed() {
        (true, AccessReason::AlwaysAllowed)
    } else {
        match role_grants {
            None => (false, AccessReason::NoRole),
            Some(grants) if grants.contains(&page) => (true, AccessReason::Granted),
            Some(_) => (false, AccessReason::NotGranted),
        }
    };

    AccessDecision { page, allowed, reason }
}

/// Full set of pages the caller may reach, by the same rule as
/// [`decide_page_access`].
pub fn effective_pages(permission: CoarsePermission, role_grants: Option<&PageSet>) -> PageSet {
    if permission.is_admin() {
        return Page::ALL.into_iter().collect();
    }

    let mut pages: PageSet = ALWAYS_ALLOWED.into_iter().collect();
    if let Some(grants) = role_grants {
        pages.extend(grants.iter().copied());
    }
    pages
}
