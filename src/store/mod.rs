//! Credential store: the data-access seam between the auth core and whatever
//! holds users, reset tokens and the audit trail.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

mod memory;
mod postgres;
mod repo_types;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use repo_types::{
    AuditAction, AuditEntry, NewAuditEntry, NewResetToken, NewUser, PasswordResetToken,
    Role, User, UserChanges,
};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique constraint hit on the named field.
    #[error("{0} already in use")]
    Conflict(&'static str),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    /// Exact, case-sensitive match.
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    /// Newest first.
    async fn list_users(&self, limit: i64, offset: i64) -> StoreResult<Vec<User>>;
    async fn create_user(&self, new: NewUser) -> StoreResult<User>;
    async fn update_user(&self, id: Uuid, changes: UserChanges) -> StoreResult<Option<User>>;
    /// Cascades to the user's reset tokens. Returns false if no such user.
    async fn delete_user(&self, id: Uuid) -> StoreResult<bool>;

    /// Marks every unused token of `new.user_id` as used at `new.created_at`
    /// and inserts `new`, as one operation.
    async fn replace_reset_token(&self, new: NewResetToken) -> StoreResult<PasswordResetToken>;
    async fn find_reset_token(&self, token: &str) -> StoreResult<Option<PasswordResetToken>>;
    /// Consumes the token and sets the owner's password hash as one unit.
    /// Returns false, with nothing changed, when the token is no longer
    /// valid at `now`.
    async fn complete_password_reset(
        &self,
        token_id: Uuid,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> StoreResult<bool>;

    async fn append_audit(&self, entry: NewAuditEntry) -> StoreResult<AuditEntry>;
    /// Newest first.
    async fn list_audit(&self, limit: i64, offset: i64) -> StoreResult<Vec<AuditEntry>>;
}
