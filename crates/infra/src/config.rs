//! Configuration loading and representation.
//!
//! Settings are read once at startup from the process environment and handed
//! to constructors explicitly; nothing reads the environment after that.

use thiserror::Error;

use orgdesk_auth::password::{DEFAULT_COST, MAX_COST, MIN_COST};

use crate::store::RoleDeletePolicy;

const DEV_JWT_SECRET: &str = "dev-secret";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    pub jwt_secret: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub run_migrations: bool,
    pub bcrypt_cost: u32,
    pub role_delete_policy: RoleDeletePolicy,
    pub bind_addr: String,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = match lookup("JWT_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None => {
                tracing::warn!("JWT_SECRET not set; using insecure dev default");
                DEV_JWT_SECRET.to_string()
            }
        };

        let database_url = lookup("DATABASE_URL").filter(|s| !s.is_empty());

        let database_max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(invalid("DATABASE_MAX_CONNECTIONS", "expected a positive integer"));
                }
            },
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let run_migrations = match lookup("RUN_MIGRATIONS") {
            Some(raw) => raw
                .trim()
                .parse::<bool>()
                .map_err(|_| invalid("RUN_MIGRATIONS", "expected 'true' or 'false'"))?,
            None => false,
        };

        let bcrypt_cost = match lookup("BCRYPT_COST") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(cost) if (MIN_COST..=MAX_COST).contains(&cost) => cost,
                _ => {
                    return Err(invalid(
                        "BCRYPT_COST",
                        format!("expected an integer between {MIN_COST} and {MAX_COST}"),
                    ));
                }
            },
            None => DEFAULT_COST,
        };

        let role_delete_policy = match lookup("ROLE_DELETE_POLICY") {
            Some(raw) => parse_delete_policy(&raw)?,
            None => RoleDeletePolicy::default(),
        };

        let bind_addr = lookup("BIND_ADDR")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        Ok(Self {
            jwt_secret,
            database_url,
            database_max_connections,
            run_migrations,
            bcrypt_cost,
            role_delete_policy,
            bind_addr,
        })
    }
}

impl core::fmt::Debug for Settings {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Settings")
            .field("jwt_secret", &"<redacted>")
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("database_max_connections", &self.database_max_connections)
            .field("run_migrations", &self.run_migrations)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("role_delete_policy", &self.role_delete_policy)
            .field("bind_addr", &self.bind_addr)
            .finish()
    }
}

fn parse_delete_policy(raw: &str) -> Result<RoleDeletePolicy, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "restrict" => Ok(RoleDeletePolicy::Restrict),
        "detach" => Ok(RoleDeletePolicy::Detach),
        _ => Err(invalid("ROLE_DELETE_POLICY", "expected 'restrict' or 'detach'")),
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}
