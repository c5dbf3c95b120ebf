use anyhow::Context;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use serde_json::json;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use crate::{
    audit,
    error::{AppError, FieldErrors},
    state::AppState,
    store::{AuditAction, NewAuditEntry, NewResetToken},
    validation::{check_password, normalize_email},
};

/// 64 alphanumeric characters, roughly 381 bits of entropy.
const TOKEN_LEN: usize = 64;

/// A freshly minted reset token, for the delivery channel.
#[derive(Debug, Clone)]
pub struct IssuedReset {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

fn generate_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Issues a reset token for the account behind `email`, invalidating any
/// outstanding ones. Unknown addresses return `Ok(None)` and create nothing;
/// callers must answer both cases identically.
pub async fn request_reset(state: &AppState, email: &str) -> Result<Option<IssuedReset>, AppError> {
    let email = normalize_email(email);
    let Some(user) = state.store.find_user_by_email(&email).await? else {
        debug!("password reset requested for unknown email");
        return Ok(None);
    };

    let now = OffsetDateTime::now_utc();
    let expires_at = now
        .checked_add(Duration::minutes(state.config.reset_token_ttl_minutes))
        .context("reset token expiry out of range")?;
    let record = state
        .store
        .replace_reset_token(NewResetToken {
            user_id: user.id,
            token: generate_token(),
            expires_at,
            created_at: now,
        })
        .await?;

    audit::record(
        state,
        NewAuditEntry {
            actor_id: Some(user.id),
            action: AuditAction::RequestPasswordReset,
            target_type: "user",
            target_id: Some(user.id),
            details: json!({ "expires_at": expires_at.unix_timestamp() }),
        },
    )
    .await;

    info!(user_id = %user.id, issued_at = %record.created_at, "password reset token issued");
    Ok(Some(IssuedReset {
        token: record.token,
        expires_at: record.expires_at,
    }))
}

/// True iff the token exists, is unused and has not expired.
pub async fn verify_token(state: &AppState, token: &str) -> Result<bool, AppError> {
    if token.is_empty() {
        return Ok(false);
    }
    let record = state.store.find_reset_token(token).await?;
    Ok(record.is_some_and(|t| t.is_valid(OffsetDateTime::now_utc())))
}

/// Sets a new password using a reset token. The token is consumed in the
/// same store operation as the password update; if that fails the token
/// stays usable.
pub async fn complete_reset(
    state: &AppState,
    token: &str,
    new_password: &str,
) -> Result<(), AppError> {
    let mut errors = FieldErrors::new();
    check_password(&mut errors, "new_password", new_password);
    errors.into_result()?;

    let record = match state.store.find_reset_token(token).await? {
        Some(t) if !token.is_empty() && t.is_valid(OffsetDateTime::now_utc()) => t,
        _ => {
            warn!("reset attempted with invalid or expired token");
            return Err(AppError::InvalidOrExpiredToken);
        }
    };

    let hash = state.hasher.hash_blocking(new_password).await?;

    let consumed = state
        .store
        .complete_password_reset(record.id, &hash, OffsetDateTime::now_utc())
        .await?;
    if !consumed {
        warn!(user_id = %record.user_id, "reset token consumed concurrently or expired");
        return Err(AppError::InvalidOrExpiredToken);
    }

    audit::record(
        state,
        NewAuditEntry {
            actor_id: Some(record.user_id),
            action: AuditAction::ResetPassword,
            target_type: "user",
            target_id: Some(record.user_id),
            details: json!({}),
        },
    )
    .await;

    info!(user_id = %record.user_id, "password reset completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::auth::services::login;
    use crate::store::{
        AuditEntry, CredentialStore, MemoryStore, NewUser, PasswordResetToken, Role, StoreError,
        StoreResult, User, UserChanges,
    };

    async fn seed(state: &AppState, username: &str, password: &str) -> Uuid {
        let hash = state.hasher.hash(password).unwrap();
        state
            .store
            .create_user(NewUser {
                username: username.into(),
                email: format!("{username}@example.com"),
                password_hash: hash,
                name: username.into(),
                role: Role::User,
            })
            .await
            .unwrap()
            .id
    }

    #[test]
    fn tokens_are_long_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn unknown_email_creates_nothing() {
        let state = AppState::fake();
        let issued = request_reset(&state, "nobody@example.com").await.unwrap();
        assert!(issued.is_none());
        assert!(state.store.list_audit(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn email_lookup_is_normalized() {
        let state = AppState::fake();
        seed(&state, "alice", "pw123456").await;
        let issued = request_reset(&state, "  ALICE@example.com ").await.unwrap();
        assert!(issued.is_some());
    }

    #[tokio::test]
    async fn second_request_leaves_exactly_one_valid_token() {
        let state = AppState::fake();
        seed(&state, "alice", "pw123456").await;

        let r1 = request_reset(&state, "alice@example.com").await.unwrap().unwrap();
        assert!(verify_token(&state, &r1.token).await.unwrap());

        let r2 = request_reset(&state, "alice@example.com").await.unwrap().unwrap();
        assert!(!verify_token(&state, &r1.token).await.unwrap());
        assert!(verify_token(&state, &r2.token).await.unwrap());
    }

    #[tokio::test]
    async fn expiry_is_one_hour() {
        let state = AppState::fake();
        seed(&state, "alice", "pw123456").await;
        let before = OffsetDateTime::now_utc();
        let issued = request_reset(&state, "alice@example.com").await.unwrap().unwrap();
        let ttl = issued.expires_at - before;
        assert!(ttl >= Duration::hours(1) && ttl < Duration::minutes(61));
    }

    #[tokio::test]
    async fn used_token_cannot_be_replayed() {
        let state = AppState::fake();
        seed(&state, "alice", "pw123456").await;
        let r = request_reset(&state, "alice@example.com").await.unwrap().unwrap();

        complete_reset(&state, &r.token, "newpw123").await.expect("first use");
        let err = complete_reset(&state, &r.token, "another1").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOrExpiredToken));
        assert!(login(&state, "alice", "newpw123").await.is_ok());
    }

    #[tokio::test]
    async fn token_older_than_an_hour_is_rejected() {
        let state = AppState::fake();
        let user_id = seed(&state, "alice", "pw123456").await;
        let created_at = OffsetDateTime::now_utc() - Duration::minutes(61);
        state
            .store
            .replace_reset_token(NewResetToken {
                user_id,
                token: "stale-token".into(),
                expires_at: created_at + Duration::hours(1),
                created_at,
            })
            .await
            .unwrap();

        assert!(!verify_token(&state, "stale-token").await.unwrap());
        let err = complete_reset(&state, "stale-token", "newpw123").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOrExpiredToken));
        assert!(login(&state, "alice", "pw123456").await.is_ok());
    }

    #[tokio::test]
    async fn weak_password_rejected_without_consuming_token() {
        let state = AppState::fake();
        seed(&state, "alice", "pw123456").await;
        let r = request_reset(&state, "alice@example.com").await.unwrap().unwrap();

        let err = complete_reset(&state, &r.token, "short").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(verify_token(&state, &r.token).await.unwrap());
    }

    /// Delegates to a [`MemoryStore`] but fails every reset completion, as a
    /// database would when the password update errors inside the transaction.
    struct BrokenResetStore(MemoryStore);

    #[async_trait]
    impl CredentialStore for BrokenResetStore {
        async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
            self.0.find_user_by_id(id).await
        }
        async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
            self.0.find_user_by_username(username).await
        }
        async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
            self.0.find_user_by_email(email).await
        }
        async fn list_users(&self, limit: i64, offset: i64) -> StoreResult<Vec<User>> {
            self.0.list_users(limit, offset).await
        }
        async fn create_user(&self, new: NewUser) -> StoreResult<User> {
            self.0.create_user(new).await
        }
        async fn update_user(&self, id: Uuid, changes: UserChanges) -> StoreResult<Option<User>> {
            self.0.update_user(id, changes).await
        }
        async fn delete_user(&self, id: Uuid) -> StoreResult<bool> {
            self.0.delete_user(id).await
        }
        async fn replace_reset_token(&self, new: NewResetToken) -> StoreResult<PasswordResetToken> {
            self.0.replace_reset_token(new).await
        }
        async fn find_reset_token(&self, token: &str) -> StoreResult<Option<PasswordResetToken>> {
            self.0.find_reset_token(token).await
        }
        async fn complete_password_reset(
            &self,
            _token_id: Uuid,
            _password_hash: &str,
            _now: OffsetDateTime,
        ) -> StoreResult<bool> {
            Err(StoreError::Backend(anyhow::anyhow!("password update failed")))
        }
        async fn append_audit(&self, entry: NewAuditEntry) -> StoreResult<AuditEntry> {
            self.0.append_audit(entry).await
        }
        async fn list_audit(&self, limit: i64, offset: i64) -> StoreResult<Vec<AuditEntry>> {
            self.0.list_audit(limit, offset).await
        }
    }

    #[tokio::test]
    async fn failed_password_update_leaves_token_usable() {
        let state = AppState::fake_with_store(Arc::new(BrokenResetStore(MemoryStore::new())));
        seed(&state, "alice", "pw123456").await;
        let r = request_reset(&state, "alice@example.com").await.unwrap().unwrap();

        let err = complete_reset(&state, &r.token, "newpw123").await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));

        assert!(verify_token(&state, &r.token).await.unwrap());
        assert!(login(&state, "alice", "pw123456").await.is_ok());
        let actions: Vec<String> = state
            .store
            .list_audit(10, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert!(!actions.contains(&"reset_password".to_string()));
    }

    #[tokio::test]
    async fn unknown_and_empty_tokens() {
        let state = AppState::fake();
        assert!(!verify_token(&state, "").await.unwrap());
        assert!(!verify_token(&state, "does-not-exist").await.unwrap());
        let err = complete_reset(&state, "does-not-exist", "newpw123").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOrExpiredToken));
    }

    #[tokio::test]
    async fn deleting_user_cascades_tokens() {
        let state = AppState::fake();
        let user_id = seed(&state, "alice", "pw123456").await;
        let r = request_reset(&state, "alice@example.com").await.unwrap().unwrap();

        assert!(state.store.delete_user(user_id).await.unwrap());
        assert!(state.store.find_reset_token(&r.token).await.unwrap().is_none());
        assert!(!verify_token(&state, &r.token).await.unwrap());
    }

    #[tokio::test]
    async fn alice_scenario() {
        let state = AppState::fake();
        let alice = seed(&state, "alice", "pw123456").await;

        let session = login(&state, "alice", "pw123456").await.unwrap();
        assert_eq!(state.codec.verify(&session.token).unwrap().user_id, alice);

        let r1 = request_reset(&state, "alice@example.com").await.unwrap().unwrap();
        assert!(verify_token(&state, &r1.token).await.unwrap());

        let r2 = request_reset(&state, "alice@example.com").await.unwrap().unwrap();
        assert!(!verify_token(&state, &r1.token).await.unwrap());
        assert!(verify_token(&state, &r2.token).await.unwrap());

        complete_reset(&state, &r2.token, "newpw123").await.unwrap();
        assert!(matches!(
            complete_reset(&state, &r2.token, "newpw123").await,
            Err(AppError::InvalidOrExpiredToken)
        ));

        assert!(login(&state, "alice", "newpw123").await.is_ok());
        assert!(matches!(
            login(&state, "alice", "pw123456").await,
            Err(AppError::InvalidCredentials)
        ));

        let actions: Vec<String> = state
            .store
            .list_audit(50, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert!(actions.contains(&"reset_password".to_string()));
        assert_eq!(
            actions.iter().filter(|a| *a == "request_password_reset").count(),
            2
        );
    }
}
