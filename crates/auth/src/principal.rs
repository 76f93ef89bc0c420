use serde::{Deserialize, Serialize};

use orgdesk_core::{RoleId, UserId};

use crate::{CoarsePermission, User};

/// The authenticated caller of an operation.
///
/// Always built from the *current* user row (after a session token has been
/// verified), never from token contents alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub email: String,
    pub permission: CoarsePermission,
    pub role_id: Option<RoleId>,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.permission.is_admin()
    }
}

impl From<User> for Principal {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            email: user.email,
            permission: user.permission,
            role_id: user.role_id,
        }
    }
}
