//! `orgdesk-auth`: pure authentication/authorization building blocks.
//!
//! This crate is intentionally decoupled from HTTP and storage: password
//! hashing, session signing, the page catalog and the access policy all work
//! on values handed to them.

pub mod authorize;
pub mod claims;
pub mod pages;
pub mod password;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod session;
pub mod user;

pub use authorize::{AccessDecision, AccessReason, AuthzError};
pub use claims::{SessionClaims, TokenValidationError, validate_claims};
pub use pages::{ALWAYS_ALLOWED, Page, PageSet, parse_page_set};
pub use password::{PasswordError, PasswordHasher};
pub use permissions::CoarsePermission;
pub use principal::Principal;
pub use roles::{Role, RoleDraft, RolePatch, RoleStatus, RoleWithGrants};
pub use session::{IssuedSession, SessionError, SessionSigner};
pub use user::{NewUser, User, UserPatch, UserRecord, normalize_email, validate_password};
