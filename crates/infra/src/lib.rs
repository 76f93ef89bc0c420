//! Infrastructure layer: stores, configuration, and the authorization engine.

pub mod config;
pub mod engine;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, Settings};
pub use engine::{AuthEngine, AuthError, Invitation, SignedIn};
pub use store::{
    AuthStore, CredentialStore, InMemoryStore, PostgresStore, RoleDeletePolicy, RoleDeletion,
    RoleRegistry, StoreError,
};
