use serde::{Deserialize, Serialize};

use orgdesk_core::DomainError;

/// Coarse, account-wide permission flag.
///
/// `Admin` bypasses page-level role checks entirely. It is carried on the user
/// record and embedded in session tokens.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CoarsePermission {
    #[default]
    User,
    Admin,
}

impl CoarsePermission {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoarsePermission::User => "user",
            CoarsePermission::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, CoarsePermission::Admin)
    }
}

impl core::fmt::Display for CoarsePermission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for CoarsePermission {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(CoarsePermission::User),
            "admin" => Ok(CoarsePermission::Admin),
            other => Err(DomainError::validation(format!(
                "permission must be 'user' or 'admin', got '{other}'"
            ))),
        }
    }
}
