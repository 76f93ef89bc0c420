//! Postgres-backed credential store and role registry.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Duplicate` | Email or role name already taken (incl. concurrent sign-up) |
//! | Database (foreign key violation) | `23503` | `Referenced` | Role still referenced, or unknown role assigned |
//! | Database (check constraint violation) | `23514` | `Backend` | Value outside an enum column's allowed set |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed / Io / Tls / PoolTimedOut | N/A | `Backend` | Connection failures (retryable) |
//!
//! Assigning an inactive role is refused with `Inactive` before the write; the
//! role row is held `FOR SHARE` until commit, so a concurrent deactivation
//! waits for the assignment (or is seen by it).
//!
//! ## Transactions
//!
//! Every multi-statement mutation runs in one `sqlx::Transaction`. A
//! transaction that is dropped without `commit()` (early `?` return, caller
//! cancellation, panic) is rolled back, so no partial write is ever visible.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use orgdesk_auth::{
    CoarsePermission, NewUser, Page, PageSet, Role, RoleDraft, RolePatch, RoleStatus,
    RoleWithGrants, UserPatch, UserRecord,
};
use orgdesk_core::{RoleId, UserId};

use super::r#trait::{CredentialStore, RoleDeletePolicy, RoleDeletion, RoleRegistry, StoreError};

const USER_COLUMNS: &str =
    "id, email, secret_hash, coarse_permission, role_id, created_at, updated_at";
const ROLE_COLUMNS: &str = "id, name, description, status, created_at, updated_at";

/// Postgres-backed store.
///
/// Uses the SQLx connection pool, which is `Send + Sync`; each operation
/// acquires one connection (or one transaction) and returns it on drop.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

#[async_trait::async_trait]
impl CredentialStore for PostgresStore {
    #[instrument(skip(self, user), fields(user_id = %user.id), err)]
    async fn insert_user(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let mut tx = self.begin().await?;
        if let Some(role_id) = user.role_id {
            lock_assignable_role(&mut tx, role_id).await?;
        }

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO users (id, email, secret_hash, coarse_permission, role_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id.as_uuid())
        .bind(&user.email)
        .bind(&user.secret_hash)
        .bind(user.permission.as_str())
        .bind(user.role_id.map(Uuid::from))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;
        let record = user_from_row(&row)?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(record)
    }

    #[instrument(skip(self), err)]
    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_user", e))?;

        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip(self, email), err)]
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_user_by_email", e))?;

        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY email"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_users", e))?;

        rows.iter().map(user_from_row).collect()
    }

    #[instrument(skip(self, patch), err)]
    async fn update_user(&self, id: UserId, patch: &UserPatch) -> Result<Option<UserRecord>, StoreError> {
        let (set_role, role_id) = match patch.role_id {
            Some(role_id) => (true, role_id.map(Uuid::from)),
            None => (false, None),
        };

        let mut tx = self.begin().await?;
        if let Some(Some(role_id)) = patch.role_id {
            lock_assignable_role(&mut tx, role_id).await?;
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE users SET
                email = COALESCE($2, email),
                role_id = CASE WHEN $3 THEN $4 ELSE role_id END,
                coarse_permission = COALESCE($5, coarse_permission),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(patch.email.as_deref())
        .bind(set_role)
        .bind(role_id)
        .bind(patch.permission.map(|p| p.as_str()))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_user", e))?;
        let record = row.as_ref().map(user_from_row).transpose()?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(record)
    }

    #[instrument(skip(self), err)]
    async fn delete_user(&self, id: UserId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl RoleRegistry for PostgresStore {
    #[instrument(skip(self, draft), fields(name = %draft.name, pages = draft.pages.len()), err)]
    async fn create_role(&self, draft: &RoleDraft) -> Result<RoleWithGrants, StoreError> {
        let mut tx = self.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO roles (id, name, description, status)
            VALUES ($1, $2, $3, $4)
            RETURNING {ROLE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(RoleId::new()))
        .bind(&draft.name)
        .bind(draft.description.as_deref())
        .bind(draft.status.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_role", e))?;
        let role = role_from_row(&row)?;

        insert_grants(&mut tx, role.id, &draft.pages).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(RoleWithGrants {
            role,
            pages: draft.pages.clone(),
        })
    }

    #[instrument(skip(self, patch), err)]
    async fn update_role(&self, id: RoleId, patch: &RolePatch) -> Result<Option<RoleWithGrants>, StoreError> {
        let mut tx = self.begin().await?;

        let (set_description, description) = match &patch.description {
            Some(d) => (true, d.as_deref()),
            None => (false, None),
        };

        let Some(row) = sqlx::query(&format!(
            r#"
            UPDATE roles SET
                name = COALESCE($2, name),
                description = CASE WHEN $3 THEN $4 ELSE description END,
                status = COALESCE($5, status),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {ROLE_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(patch.name.as_deref())
        .bind(set_description)
        .bind(description)
        .bind(patch.status.map(|s| s.as_str()))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_role", e))?
        else {
            // Dropping `tx` rolls back.
            return Ok(None);
        };
        let role = role_from_row(&row)?;

        let pages = match &patch.pages {
            Some(pages) => {
                // Delete-then-insert inside the transaction: concurrent readers keep
                // seeing the old set until commit, never a union or an empty set.
                sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
                    .bind(id.as_uuid())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("delete_grants", e))?;
                insert_grants(&mut tx, id, pages).await?;
                pages.clone()
            }
            None => select_grants(&mut *tx, id).await?,
        };

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(Some(RoleWithGrants { role, pages }))
    }

    #[instrument(skip(self), err)]
    async fn delete_role(&self, id: RoleId, policy: RoleDeletePolicy) -> Result<RoleDeletion, StoreError> {
        let mut tx = self.begin().await?;

        // Lock the role row so no concurrent assignment slips in between the
        // reference check and the delete.
        let exists = sqlx::query("SELECT id FROM roles WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_role", e))?
            .is_some();
        if !exists {
            return Ok(RoleDeletion::NotFound);
        }

        let detached_users = match policy {
            RoleDeletePolicy::Restrict => {
                let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role_id = $1")
                    .bind(id.as_uuid())
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("count_role_users", e))?;
                if users > 0 {
                    return Ok(RoleDeletion::Referenced { users: users as u64 });
                }
                0
            }
            RoleDeletePolicy::Detach => sqlx::query(
                "UPDATE users SET role_id = NULL, updated_at = NOW() WHERE role_id = $1",
            )
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("detach_role_users", e))?
            .rows_affected(),
        };

        // Grants go with the role (ON DELETE CASCADE).
        sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(RoleDeletion::Deleted { detached_users })
    }

    #[instrument(skip(self), err)]
    async fn find_role(&self, id: RoleId) -> Result<Option<RoleWithGrants>, StoreError> {
        // One transaction so attributes and grants come from the same snapshot.
        let mut tx = self.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        let Some(row) = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("find_role", e))?
        else {
            return Ok(None);
        };
        let role = role_from_row(&row)?;
        let pages = select_grants(&mut *tx, id).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(Some(RoleWithGrants { role, pages }))
    }

    #[instrument(skip(self), err)]
    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY name"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_roles", e))?;

        rows.iter().map(role_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn role_grants(&self, id: RoleId) -> Result<Option<PageSet>, StoreError> {
        // A single statement sees one snapshot: either the old or the new grant set.
        let row = sqlx::query(
            r#"
            SELECT
                r.id,
                COALESCE(array_agg(p.page) FILTER (WHERE p.page IS NOT NULL), '{}') AS pages
            FROM roles r
            LEFT JOIN role_permissions p ON p.role_id = r.id
            WHERE r.id = $1
            GROUP BY r.id
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("role_grants", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let pages: Vec<String> = row
            .try_get("pages")
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        parse_pages(pages).map(Some)
    }
}

/// Share-lock the role row for the rest of the transaction and require it to
/// be active.
async fn lock_assignable_role(
    tx: &mut Transaction<'static, Postgres>,
    role_id: RoleId,
) -> Result<(), StoreError> {
    let row = sqlx::query("SELECT name, status FROM roles WHERE id = $1 FOR SHARE")
        .bind(role_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_role", e))?;

    let Some(row) = row else {
        return Err(StoreError::Referenced("users.role_id".to_string()));
    };
    let decode = |e: sqlx::Error| StoreError::Decode(e.to_string());
    let name: String = row.try_get("name").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    match status
        .parse::<RoleStatus>()
        .map_err(|e| StoreError::Decode(e.to_string()))?
    {
        RoleStatus::Active => Ok(()),
        RoleStatus::Inactive => Err(StoreError::Inactive(name)),
    }
}

async fn insert_grants(
    tx: &mut Transaction<'static, Postgres>,
    role_id: RoleId,
    pages: &PageSet,
) -> Result<(), StoreError> {
    if pages.is_empty() {
        return Ok(());
    }

    let ids: Vec<Uuid> = pages.iter().map(|_| Uuid::now_v7()).collect();
    let names: Vec<String> = pages.iter().map(|p| p.as_str().to_string()).collect();

    sqlx::query(
        r#"
        INSERT INTO role_permissions (id, role_id, page)
        SELECT g.id, $2, g.page
        FROM UNNEST($1::uuid[], $3::text[]) AS g(id, page)
        "#,
    )
    .bind(&ids)
    .bind(role_id.as_uuid())
    .bind(&names)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_grants", e))?;

    Ok(())
}

async fn select_grants(
    conn: &mut sqlx::PgConnection,
    role_id: RoleId,
) -> Result<PageSet, StoreError> {
    let pages: Vec<String> =
        sqlx::query_scalar("SELECT page FROM role_permissions WHERE role_id = $1")
            .bind(role_id.as_uuid())
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("select_grants", e))?;

    parse_pages(pages)
}

fn parse_pages(pages: Vec<String>) -> Result<PageSet, StoreError> {
    pages
        .iter()
        .map(|p| p.parse::<Page>().map_err(|e| StoreError::Decode(e.to_string())))
        .collect::<Result<BTreeSet<_>, _>>()
}

fn user_from_row(row: &PgRow) -> Result<UserRecord, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Decode(e.to_string());

    let permission: String = row.try_get("coarse_permission").map_err(decode)?;
    let role_id: Option<Uuid> = row.try_get("role_id").map_err(decode)?;

    Ok(UserRecord {
        id: UserId::from_uuid(row.try_get("id").map_err(decode)?),
        email: row.try_get("email").map_err(decode)?,
        secret_hash: row.try_get("secret_hash").map_err(decode)?,
        permission: permission
            .parse::<CoarsePermission>()
            .map_err(|e| StoreError::Decode(e.to_string()))?,
        role_id: role_id.map(RoleId::from_uuid),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode)?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(decode)?,
    })
}

fn role_from_row(row: &PgRow) -> Result<Role, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Decode(e.to_string());

    let status: String = row.try_get("status").map_err(decode)?;

    Ok(Role {
        id: RoleId::from_uuid(row.try_get("id").map_err(decode)?),
        name: row.try_get("name").map_err(decode)?,
        description: row.try_get("description").map_err(decode)?,
        status: status
            .parse::<RoleStatus>()
            .map_err(|e| StoreError::Decode(e.to_string()))?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode)?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(decode)?,
    })
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let target = db_err
                .constraint()
                .map(str::to_string)
                .unwrap_or_else(|| operation.to_string());

            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(target),
                Some("23503") => StoreError::Referenced(target),
                _ => StoreError::Backend(format!(
                    "database error in {}: {}",
                    operation,
                    db_err.message()
                )),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Backend(format!("connection pool timed out in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
