//! One-way salted password hashing (bcrypt).
//!
//! Digests use the modular-crypt format (`$2b$<cost>$<salt><hash>`), so the
//! cost factor and salt travel with the digest and verification needs no
//! out-of-band parameters.

use thiserror::Error;

pub use bcrypt::DEFAULT_COST;

pub const MIN_COST: u32 = 4;
pub const MAX_COST: u32 = 31;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PasswordError {
    #[error("bcrypt cost must be between {MIN_COST} and {MAX_COST}, got {0}")]
    InvalidCost(u32),

    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// Salted, deliberately slow password hasher.
///
/// Both operations are CPU-bound; async callers should run them on a blocking
/// thread.
#[derive(Clone)]
pub struct PasswordHasher {
    cost: u32,
    dummy_digest: String,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Result<Self, PasswordError> {
        if !(MIN_COST..=MAX_COST).contains(&cost) {
            return Err(PasswordError::InvalidCost(cost));
        }
        let dummy_digest = bcrypt::hash("orgdesk-dummy-password", cost)
            .map_err(|e| PasswordError::Hashing(e.to_string()))?;
        Ok(Self { cost, dummy_digest })
    }

    pub fn hash(&self, plaintext: &str) -> Result<String, PasswordError> {
        bcrypt::hash(plaintext, self.cost).map_err(|e| PasswordError::Hashing(e.to_string()))
    }

    /// Check `plaintext` against `digest`.
    ///
    /// A malformed digest is a non-match, never an error.
    pub fn verify(&self, plaintext: &str, digest: &str) -> bool {
        bcrypt::verify(plaintext, digest).unwrap_or(false)
    }

    /// Burn one verification's worth of CPU against a throwaway digest.
    ///
    /// Used when the account does not exist so that timing does not reveal it.
    pub fn verify_dummy(&self, plaintext: &str) -> bool {
        let _ = self.verify(plaintext, &self.dummy_digest);
        false
    }
}

impl core::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PasswordHasher").field("cost", &self.cost).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(MIN_COST).unwrap()
    }

    #[test]
    fn digest_embeds_cost_and_differs_per_call() {
        let hasher = hasher();
        let a = hasher.hash("correct horse").unwrap();
        let b = hasher.hash("correct horse").unwrap();

        assert!(a.starts_with("$2b$04$"));
        assert_ne!(a, b, "salts must differ");
        assert!(hasher.verify("correct horse", &a));
        assert!(hasher.verify("correct horse", &b));
    }

    #[test]
    fn wrong_password_does_not_verify() {
        let hasher = hasher();
        let digest = hasher.hash("correct horse").unwrap();
        assert!(!hasher.verify("battery staple", &digest));
    }

    #[test]
    fn malformed_digest_is_a_non_match() {
        let hasher = hasher();
        assert!(!hasher.verify("anything", ""));
        assert!(!hasher.verify("anything", "$2b$04$short"));
        assert!(!hasher.verify("anything", "plaintext-in-the-column"));
    }

    #[test]
    fn cost_outside_bcrypt_range_is_rejected() {
        assert_eq!(PasswordHasher::new(3).unwrap_err(), PasswordError::InvalidCost(3));
        assert!(PasswordHasher::new(32).is_err());
    }

    #[test]
    fn dummy_verification_never_matches() {
        assert!(!hasher().verify_dummy("orgdesk-dummy-password"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn verify_accepts_its_own_hash(password in "[ -~]{8,72}") {
            let hasher = hasher();
            let digest = hasher.hash(&password).unwrap();
            prop_assert!(hasher.verify(&password, &digest));
            prop_assert!(hasher.verify(&password, &digest));
        }
    }
}
