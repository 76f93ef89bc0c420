//! Persistence boundary for credentials, roles and grants.
//!
//! The engine only talks to the traits in [`r#trait`]; the in-memory store
//! backs tests and dev runs, the Postgres store backs production.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use r#trait::{
    AuthStore, CredentialStore, RoleDeletePolicy, RoleDeletion, RoleRegistry, StoreError,
};
