use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    AuditEntry, CredentialStore, NewAuditEntry, NewResetToken, NewUser, PasswordResetToken,
    StoreError, StoreResult, User, UserChanges,
};

const USER_COLUMNS: &str = "id, username, email, password_hash, name, role, created_at";
const TOKEN_COLUMNS: &str = "id, user_id, token, expires_at, used_at, created_at";
const AUDIT_COLUMNS: &str = "id, actor_id, action, target_type, target_id, details, created_at";

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to database")?;
        Ok(Self { db })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .context("run migrations")?;
        Ok(())
    }
}

/// Maps unique-constraint violations to a field-level conflict; everything
/// else is a backend failure.
fn store_err(e: sqlx::Error, what: &'static str) -> StoreError {
    if let Some(db_err) = e.as_database_error() {
        if db_err.is_unique_violation() {
            let field = match db_err.constraint() {
                Some("users_username_key") => "username",
                Some("users_email_key") => "email",
                Some("password_reset_tokens_token_key") => "token",
                _ => "record",
            };
            return StoreError::Conflict(field);
        }
    }
    StoreError::Backend(anyhow::Error::new(e).context(what))
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| store_err(e, "find user by id"))
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| store_err(e, "find user by username"))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| store_err(e, "find user by email"))
    }

    async fn list_users(&self, limit: i64, offset: i64) -> StoreResult<Vec<User>> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .map_err(|e| store_err(e, "list users"))
    }

    async fn create_user(&self, new: NewUser) -> StoreResult<User> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, username, email, password_hash, name, role)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.name)
        .bind(new.role)
        .fetch_one(&self.db)
        .await
        .map_err(|e| store_err(e, "create user"))
    }

    async fn update_user(&self, id: Uuid, changes: UserChanges) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET
                username      = COALESCE($2, username),
                email         = COALESCE($3, email),
                name          = COALESCE($4, name),
                role          = COALESCE($5, role),
                password_hash = COALESCE($6, password_hash)
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.username)
        .bind(changes.email)
        .bind(changes.name)
        .bind(changes.role)
        .bind(changes.password_hash)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| store_err(e, "update user"))
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(|e| store_err(e, "delete user"))?;
        Ok(res.rows_affected() > 0)
    }

    async fn replace_reset_token(&self, new: NewResetToken) -> StoreResult<PasswordResetToken> {
        let mut tx = self
            .db
            .begin()
            .await
            .map_err(|e| store_err(e, "begin tx"))?;

        sqlx::query(
            r#"
            UPDATE password_reset_tokens
               SET used_at = $2
             WHERE user_id = $1 AND used_at IS NULL
            "#,
        )
        .bind(new.user_id)
        .bind(new.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| store_err(e, "invalidate reset tokens"))?;

        let token = sqlx::query_as::<_, PasswordResetToken>(&format!(
            r#"
            INSERT INTO password_reset_tokens (id, user_id, token, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(&new.token)
        .bind(new.expires_at)
        .bind(new.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| store_err(e, "insert reset token"))?;

        tx.commit().await.map_err(|e| store_err(e, "commit tx"))?;
        Ok(token)
    }

    async fn find_reset_token(&self, token: &str) -> StoreResult<Option<PasswordResetToken>> {
        sqlx::query_as::<_, PasswordResetToken>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM password_reset_tokens WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| store_err(e, "find reset token"))
    }

    async fn complete_password_reset(
        &self,
        token_id: Uuid,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> StoreResult<bool> {
        let mut tx = self
            .db
            .begin()
            .await
            .map_err(|e| store_err(e, "begin tx"))?;

        // Conditional consume; a concurrent submission of the same token
        // finds zero rows here.
        let owner: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE password_reset_tokens
               SET used_at = $2
             WHERE id = $1 AND used_at IS NULL AND expires_at > $2
            RETURNING user_id
            "#,
        )
        .bind(token_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| store_err(e, "consume reset token"))?;

        let Some((user_id,)) = owner else {
            return Ok(false);
        };

        let updated = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(&mut *tx)
            .await
            .map_err(|e| store_err(e, "update password"))?;
        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        tx.commit().await.map_err(|e| store_err(e, "commit tx"))?;
        Ok(true)
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> StoreResult<AuditEntry> {
        sqlx::query_as::<_, AuditEntry>(&format!(
            r#"
            INSERT INTO audit_logs (id, actor_id, action, target_type, target_id, details)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {AUDIT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(entry.actor_id)
        .bind(entry.action.as_str())
        .bind(entry.target_type)
        .bind(entry.target_id)
        .bind(entry.details)
        .fetch_one(&self.db)
        .await
        .map_err(|e| store_err(e, "append audit"))
    }

    async fn list_audit(&self, limit: i64, offset: i64) -> StoreResult<Vec<AuditEntry>> {
        sqlx::query_as::<_, AuditEntry>(&format!(
            r#"
            SELECT {AUDIT_COLUMNS}
            FROM audit_logs
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .map_err(|e| store_err(e, "list audit"))
    }
}
