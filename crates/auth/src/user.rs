//! User identity records and input validation.
//!
//! Two shapes exist on purpose: [`UserRecord`] is what the credential store
//! holds (including the password digest) and never leaves the engine;
//! [`User`] is the outward view with all secret material stripped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orgdesk_core::{DomainError, RoleId, UserId};

use crate::permissions::CoarsePermission;

pub const MIN_PASSWORD_LEN: usize = 8;

/// bcrypt only looks at the first 72 bytes; longer inputs are refused rather
/// than silently truncated.
pub const MAX_PASSWORD_BYTES: usize = 72;

const MAX_EMAIL_LEN: usize = 254;

/// Outward view of a user account (no secret material).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub permission: CoarsePermission,
    pub role_id: Option<RoleId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored user row, including the password digest.
#[derive(Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub email: String,
    pub secret_hash: String,
    pub permission: CoarsePermission,
    pub role_id: Option<RoleId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn to_user(&self) -> User {
        User {
            id: self.id,
            email: self.email.clone(),
            permission: self.permission,
            role_id: self.role_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        User {
            id: record.id,
            email: record.email,
            permission: record.permission,
            role_id: record.role_id,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

impl core::fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserRecord")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("secret_hash", &"<redacted>")
            .field("permission", &self.permission)
            .field("role_id", &self.role_id)
            .finish()
    }
}

/// A user row ready to be inserted (id assigned, password already hashed).
#[derive(Clone)]
pub struct NewUser {
    pub id: UserId,
    pub email: String,
    pub secret_hash: String,
    pub permission: CoarsePermission,
    pub role_id: Option<RoleId>,
}

/// Partial update of a user.
///
/// `role_id: Some(None)` clears the role; `None` leaves it unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, with = "double_option")]
    pub role_id: Option<Option<RoleId>>,
    #[serde(default)]
    pub permission: Option<CoarsePermission>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.role_id.is_none() && self.permission.is_none()
    }

    /// Whether the patch touches anything beyond the email address.
    pub fn touches_privileges(&self) -> bool {
        self.role_id.is_some() || self.permission.is_some()
    }

    /// Normalize the email (if present) and validate it.
    pub fn validated(self) -> Result<Self, DomainError> {
        Ok(Self {
            email: self.email.as_deref().map(normalize_email).transpose()?,
            ..self
        })
    }
}

/// Normalize an email address to its canonical (trimmed, lowercase) form and
/// check its shape.
pub fn normalize_email(email: &str) -> Result<String, DomainError> {
    let email = email.trim().to_lowercase();

    if email.is_empty() || email.len() > MAX_EMAIL_LEN {
        return Err(DomainError::validation("invalid email format"));
    }
    if email.chars().any(char::is_whitespace) {
        return Err(DomainError::validation("invalid email format"));
    }

    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(DomainError::validation("invalid email format"));
    };
    if local.is_empty() || domain.is_empty() || domain.starts_with('.') || domain.ends_with('.') {
        return Err(DomainError::validation("invalid email format"));
    }

    Ok(email)
}

pub fn validate_password(password: &str) -> Result<(), DomainError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(DomainError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(DomainError::validation(format!(
            "password cannot exceed {MAX_PASSWORD_BYTES} bytes"
        )));
    }
    Ok(())
}

/// Serde support for `Option<Option<T>>` where an explicit `null` means
/// "clear" and an absent field means "unchanged".
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_trimmed_and_lowercased() {
        assert_eq!(normalize_email("  Alice@Example.COM ").unwrap(), "alice@example.com");
    }

    #[test]
    fn malformed_emails_are_rejected() {
        for bad in ["", "alice", "@example.com", "alice@", "a@b@c", "al ice@example.com", "a@.com"] {
            assert!(normalize_email(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn short_and_overlong_passwords_are_rejected() {
        assert!(validate_password("short").is_err());
        assert!(validate_password(&"x".repeat(73)).is_err());
        assert!(validate_password("correct horse").is_ok());
    }

    #[test]
    fn patch_distinguishes_null_role_from_absent_role() {
        let cleared: UserPatch = serde_json::from_str(r#"{"role_id": null}"#).unwrap();
        assert_eq!(cleared.role_id, Some(None));

        let untouched: UserPatch = serde_json::from_str(r#"{"email": "a@b.io"}"#).unwrap();
        assert_eq!(untouched.role_id, None);
        assert!(!untouched.touches_privileges());
    }

    #[test]
    fn record_debug_never_prints_the_digest() {
        let record = UserRecord {
            id: UserId::new(),
            email: "a@b.io".to_string(),
            secret_hash: "$2b$04$secretsecretsecret".to_string(),
            permission: CoarsePermission::User,
            role_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let rendered = format!("{record:?}");
        assert!(!rendered.contains("secretsecret"));
        assert!(rendered.contains("<redacted>"));
    }
}
