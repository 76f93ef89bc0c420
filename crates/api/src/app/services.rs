//! Service wiring: store selection, pool construction, engine assembly.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use orgdesk_auth::{PasswordError, PasswordHasher, SessionSigner};
use orgdesk_core::DomainError;
use orgdesk_infra::{AuthEngine, AuthStore, InMemoryStore, PostgresStore, RoleDeletePolicy, Settings, StoreError};

/// Engine over a store chosen at startup.
pub type AppEngine = AuthEngine<Arc<dyn AuthStore>>;

/// Engine handle shared by every request.
pub type SharedEngine = Arc<AppEngine>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid session secret: {0}")]
    Secret(#[from] DomainError),

    #[error("invalid password hasher settings: {0}")]
    Hasher(#[from] PasswordError),

    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Store(#[from] StoreError),
}

/// Build the engine described by `settings`.
///
/// With `DATABASE_URL` set, connects a bounded Postgres pool (and applies the
/// embedded migrations when asked); otherwise falls back to the in-memory
/// store.
pub async fn build_engine(settings: &Settings) -> Result<AppEngine, ServiceError> {
    let store: Arc<dyn AuthStore> = match &settings.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(settings.database_max_connections)
                .connect(url)
                .await?;
            let store = PostgresStore::new(pool);

            if settings.run_migrations {
                store.migrate().await?;
                tracing::info!("migrations applied");
            }

            tracing::info!(
                max_connections = settings.database_max_connections,
                "using postgres store"
            );
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store (data is lost on restart)");
            Arc::new(InMemoryStore::new())
        }
    };

    assemble(
        store,
        settings.jwt_secret.as_bytes(),
        settings.bcrypt_cost,
        settings.role_delete_policy,
    )
}

/// In-memory engine for tests and local runs.
pub fn in_memory_engine(jwt_secret: &str, bcrypt_cost: u32) -> Result<AppEngine, ServiceError> {
    assemble(
        Arc::new(InMemoryStore::new()),
        jwt_secret.as_bytes(),
        bcrypt_cost,
        RoleDeletePolicy::default(),
    )
}

fn assemble(
    store: Arc<dyn AuthStore>,
    secret: &[u8],
    bcrypt_cost: u32,
    delete_policy: RoleDeletePolicy,
) -> Result<AppEngine, ServiceError> {
    let signer = SessionSigner::new(secret)?;
    let hasher = PasswordHasher::new(bcrypt_cost)?;
    Ok(AuthEngine::new(store, signer, hasher).with_delete_policy(delete_policy))
}
