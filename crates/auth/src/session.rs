//! Session token issuance and verification (HS256-signed JWT).

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;

use orgdesk_core::{DomainError, UserId};

use crate::CoarsePermission;
use crate::claims::{SessionClaims, TokenValidationError, validate_claims};

/// Fixed lifetime of a session token.
pub const SESSION_TTL_HOURS: i64 = 24;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Signature, header or payload could not be verified.
    #[error("invalid token")]
    Invalid,

    #[error("{0}")]
    Window(#[from] TokenValidationError),

    #[error("token encoding failed: {0}")]
    Encoding(String),
}

/// A freshly minted token and the claims it asserts.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub claims: SessionClaims,
}

/// Issues and verifies tamper-evident, time-bound session tokens.
///
/// The secret is process-wide configuration handed in at construction.
/// Rotating it invalidates every outstanding token.
#[derive(Clone)]
pub struct SessionSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl SessionSigner {
    pub fn new(secret: &[u8]) -> Result<Self, DomainError> {
        if secret.is_empty() {
            return Err(DomainError::validation("session signing secret cannot be empty"));
        }

        // Expiry is checked by `validate_claims` against an explicit clock, so
        // the library check is off; signature and algorithm are still enforced.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl: Duration::hours(SESSION_TTL_HOURS),
        })
    }

    pub fn issue(
        &self,
        user_id: UserId,
        email: &str,
        permission: CoarsePermission,
    ) -> Result<IssuedSession, SessionError> {
        self.issue_at(user_id, email, permission, Utc::now())
    }

    pub fn issue_at(
        &self,
        user_id: UserId,
        email: &str,
        permission: CoarsePermission,
        now: DateTime<Utc>,
    ) -> Result<IssuedSession, SessionError> {
        let claims = SessionClaims {
            sub: user_id,
            email: email.to_string(),
            permission,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| SessionError::Encoding(e.to_string()))?;

        Ok(IssuedSession { token, claims })
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify the signature first, then the time window at `now`.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, SessionError> {
        let data = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| SessionError::Invalid)?;

        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

impl core::fmt::Debug for SessionSigner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionSigner")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
