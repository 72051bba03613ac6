//! Postgres-backed credential store.
//!
//! ## Error mapping
//!
//! | SQLx error | PostgreSQL code | `StoreError` | Scenario |
//! |---|---|---|---|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate role `value` |
//! | Database (foreign key violation) | `23503` | `MissingReference` | Grant to a permission id that does not exist |
//! | Database (other) | any other | `Backend` | |
//! | PoolTimedOut / PoolClosed / Io / other | n/a | `Backend` | Store unreachable |
//!
//! ## Soft deletes
//!
//! `businesses`, `users`, `roles` and `permissions` carry a nullable
//! `deleted_at`. Soft-deleted rows are invisible to every read in this module,
//! and a soft-deleted permission grants nothing even while its edge remains.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use calth_auth::store::{
    BusinessRecord, PermissionRecord, RoleGrants, RoleRecord, UserCredentials, UserProfile,
    UserRecord,
};
use calth_auth::{
    ActionKey, GrantSet, Identity, IdentityStore, NewRole, PermissionLookup, RoleFieldsUpdate,
    RoleGrantStore, SessionStore, StoreError,
};
use calth_core::{BusinessId, PermissionId, RoleId, UserId};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS businesses (
        id          UUID PRIMARY KEY,
        name        TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        deleted_at  TIMESTAMPTZ NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS roles (
        id          UUID PRIMARY KEY,
        name        TEXT NOT NULL,
        value       TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        deleted_at  TIMESTAMPTZ NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS permissions (
        id          UUID PRIMARY KEY,
        name        TEXT NOT NULL,
        category    TEXT NULL,
        action_key  TEXT NOT NULL UNIQUE,
        description TEXT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        deleted_at  TIMESTAMPTZ NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id            UUID PRIMARY KEY,
        business_id   UUID NOT NULL REFERENCES businesses (id),
        role_id       UUID NOT NULL REFERENCES roles (id),
        ic            TEXT NOT NULL DEFAULT '',
        user_name     TEXT NOT NULL,
        first_name    TEXT NOT NULL DEFAULT '',
        last_name     TEXT NOT NULL DEFAULT '',
        email         TEXT NOT NULL,
        phone_number  TEXT NOT NULL DEFAULT '',
        password      TEXT NOT NULL,
        refresh_token TEXT NULL,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
        deleted_at    TIMESTAMPTZ NULL,
        UNIQUE (business_id, email)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS role_permissions (
        role_id       UUID NOT NULL REFERENCES roles (id) ON DELETE CASCADE,
        permission_id UUID NOT NULL REFERENCES permissions (id),
        created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (role_id, permission_id)
    )
    "#,
];

#[derive(Debug, Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool. `acquire_timeout` bounds how long a call may wait for
    /// a connection before failing.
    pub async fn connect(
        database_url: &str,
        acquire_timeout: std::time::Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the credential tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for PgCredentialStore {
    #[instrument(skip(self), fields(business_id = %id), err)]
    async fn find_business(&self, id: BusinessId) -> Result<Option<BusinessRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name
            FROM businesses
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_business", e))?;

        row.as_ref()
            .map(business_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("find_business", e))
    }

    #[instrument(skip(self, email), fields(business_id = %business_id), err)]
    async fn find_user_by_email(
        &self,
        business_id: BusinessId,
        email: &str,
    ) -> Result<Option<UserCredentials>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, business_id, role_id, password
            FROM users
            WHERE business_id = $1 AND email = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(business_id.as_uuid())
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_user_by_email", e))?;

        row.as_ref()
            .map(credentials_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("find_user_by_email", e))
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn find_user(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT u.id, u.business_id, u.role_id, u.refresh_token
            FROM users u
            JOIN businesses b ON b.id = u.business_id AND b.deleted_at IS NULL
            WHERE u.id = $1 AND u.deleted_at IS NULL
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_user", e))?;

        row.as_ref()
            .map(user_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("find_user", e))
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.user_id), err)]
    async fn user_profile(&self, identity: &Identity) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, ic, user_name, first_name, last_name, email, phone_number,
                   role_id, business_id, created_at, updated_at
            FROM users
            WHERE id = $1 AND business_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(identity.user_id.as_uuid())
        .bind(identity.business_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("user_profile", e))?;

        row.as_ref()
            .map(profile_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("user_profile", e))
    }
}

#[async_trait]
impl SessionStore for PgCredentialStore {
    #[instrument(skip(self, token), fields(user_id = %user_id), err)]
    async fn record_refresh(&self, user_id: UserId, token: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET refresh_token = $2, updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_refresh", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    #[instrument(skip(self, expected, new), fields(user_id = %user_id), err)]
    async fn swap_refresh(
        &self,
        user_id: UserId,
        expected: &str,
        new: &str,
    ) -> Result<bool, StoreError> {
        // Single conditional UPDATE: row-level locking makes a concurrent
        // second swap re-check the predicate and match zero rows.
        let result = sqlx::query(
            r#"
            UPDATE users
            SET refresh_token = $3, updated_at = now()
            WHERE id = $1 AND refresh_token = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(expected)
        .bind(new)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("swap_refresh", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn clear_refresh(&self, user_id: UserId) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE users
            SET refresh_token = NULL, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("clear_refresh", e))?;
        Ok(())
    }
}

#[async_trait]
impl PermissionLookup for PgCredentialStore {
    #[instrument(skip(self), fields(role_id = %role_id, action_key = %key), err)]
    async fn has_permission(&self, role_id: RoleId, key: &ActionKey) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM role_permissions rp
                JOIN permissions p ON p.id = rp.permission_id
                JOIN roles r ON r.id = rp.role_id
                WHERE rp.role_id = $1
                  AND p.action_key = $2
                  AND p.deleted_at IS NULL
                  AND r.deleted_at IS NULL
            ) AS granted
            "#,
        )
        .bind(role_id.as_uuid())
        .bind(key.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_permission", e))?;

        row.try_get::<bool, _>("granted")
            .map_err(|e| map_sqlx_error("has_permission", e))
    }
}

#[async_trait]
impl RoleGrantStore for PgCredentialStore {
    #[instrument(skip(self, role, grants), fields(value = %role.value, grants = grants.len()), err)]
    async fn create_role(&self, role: &NewRole, grants: &GrantSet) -> Result<RoleId, StoreError> {
        let role_id = RoleId::new();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO roles (id, name, value, description)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(role_id.as_uuid())
        .bind(&role.name)
        .bind(&role.value)
        .bind(&role.description)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("create_role", e))?;

        insert_edges(&mut tx, role_id, grants).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(role_id)
    }

    #[instrument(skip(self, fields, grants), fields(role_id = %role_id, grants = grants.len()), err)]
    async fn replace_grants(
        &self,
        role_id: RoleId,
        fields: Option<&RoleFieldsUpdate>,
        grants: &GrantSet,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Always touch the role row: it both applies the optional field
        // update and locks the role for the rest of the transaction.
        let updated = sqlx::query(
            r#"
            UPDATE roles
            SET name = COALESCE($2, name),
                value = COALESCE($3, value),
                description = COALESCE($4, description),
                updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(role_id.as_uuid())
        .bind(fields.and_then(|f| f.name.as_deref()))
        .bind(fields.and_then(|f| f.value.as_deref()))
        .bind(fields.and_then(|f| f.description.as_deref()))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_role", e))?;

        if updated.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::NotFound(format!("role {role_id}")));
        }

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role_permissions", e))?;

        insert_edges(&mut tx, role_id, grants).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(role_id = %role_id), err)]
    async fn role_with_grants(&self, role_id: RoleId) -> Result<Option<RoleGrants>, StoreError> {
        // Both reads share one snapshot so a concurrent replace_grants is
        // seen entirely or not at all.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        let Some(row) = sqlx::query(
            r#"
            SELECT id, name, value, description, created_at, updated_at
            FROM roles
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(role_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("role_with_grants", e))?
        else {
            return Ok(None);
        };

        let role = role_from_row(&row).map_err(|e| map_sqlx_error("role_with_grants", e))?;

        let rows = sqlx::query(
            r#"
            SELECT p.id, p.name, p.category, p.action_key, p.description
            FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = $1 AND p.deleted_at IS NULL
            ORDER BY rp.created_at ASC, p.action_key ASC
            "#,
        )
        .bind(role_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("role_with_grants", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        let mut permissions = Vec::with_capacity(rows.len());
        for row in rows {
            permissions.push(permission_from_row(&row)?);
        }

        Ok(Some(RoleGrants { role, permissions }))
    }
}

async fn insert_edges(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    role_id: RoleId,
    grants: &GrantSet,
) -> Result<(), StoreError> {
    if grants.is_empty() {
        return Ok(());
    }
    let ids: Vec<Uuid> = grants.ids().iter().map(|id| *id.as_uuid()).collect();

    sqlx::query(
        r#"
        INSERT INTO role_permissions (role_id, permission_id)
        SELECT $1, unnest($2::uuid[])
        "#,
    )
    .bind(role_id.as_uuid())
    .bind(ids)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_role_permissions", e))?;
    Ok(())
}

fn business_from_row(row: &PgRow) -> Result<BusinessRecord, sqlx::Error> {
    Ok(BusinessRecord {
        id: BusinessId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
    })
}

fn credentials_from_row(row: &PgRow) -> Result<UserCredentials, sqlx::Error> {
    Ok(UserCredentials {
        user_id: UserId::from_uuid(row.try_get("id")?),
        business_id: BusinessId::from_uuid(row.try_get("business_id")?),
        role_id: RoleId::from_uuid(row.try_get("role_id")?),
        password_hash: row.try_get("password")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<UserRecord, sqlx::Error> {
    Ok(UserRecord {
        user_id: UserId::from_uuid(row.try_get("id")?),
        business_id: BusinessId::from_uuid(row.try_get("business_id")?),
        role_id: RoleId::from_uuid(row.try_get("role_id")?),
        refresh_token: row.try_get("refresh_token")?,
    })
}

fn profile_from_row(row: &PgRow) -> Result<UserProfile, sqlx::Error> {
    Ok(UserProfile {
        id: UserId::from_uuid(row.try_get("id")?),
        ic: row.try_get("ic")?,
        user_name: row.try_get("user_name")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        phone_number: row.try_get("phone_number")?,
        role_id: RoleId::from_uuid(row.try_get("role_id")?),
        business_id: BusinessId::from_uuid(row.try_get("business_id")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn role_from_row(row: &PgRow) -> Result<RoleRecord, sqlx::Error> {
    Ok(RoleRecord {
        id: RoleId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        value: row.try_get("value")?,
        description: row.try_get("description")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn permission_from_row(row: &PgRow) -> Result<PermissionRecord, StoreError> {
    let raw_key: String = row
        .try_get("action_key")
        .map_err(|e| map_sqlx_error("role_with_grants", e))?;
    let action_key = ActionKey::parse(&raw_key)
        .map_err(|e| StoreError::Backend(format!("stored action key {raw_key:?}: {e}")))?;

    permission_fields(row, action_key).map_err(|e| map_sqlx_error("role_with_grants", e))
}

fn permission_fields(row: &PgRow, action_key: ActionKey) -> Result<PermissionRecord, sqlx::Error> {
    Ok(PermissionRecord {
        id: PermissionId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        category: row.try_get("category")?,
        action_key,
        description: row.try_get("description")?,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") => StoreError::MissingReference(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Backend(format!("timed out acquiring a connection in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
