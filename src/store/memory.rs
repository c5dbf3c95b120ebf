use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AuditEntry, CredentialStore, NewAuditEntry, NewResetToken, NewUser, PasswordResetToken,
    StoreError, StoreResult, User, UserChanges,
};

/// Process-local store for development without a database, and for tests.
/// Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    reset_tokens: Vec<PasswordResetToken>,
    audit: Vec<AuditEntry>,
}

impl Inner {
    fn check_unique(
        &self,
        except: Option<Uuid>,
        username: Option<&str>,
        email: Option<&str>,
    ) -> StoreResult<()> {
        let others = self.users.values().filter(|u| Some(u.id) != except);
        for user in others {
            if username == Some(user.username.as_str()) {
                return Err(StoreError::Conflict("username"));
            }
            if email == Some(user.email.as_str()) {
                return Err(StoreError::Conflict("email"));
            }
        }
        Ok(())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page<T: Clone>(items: impl Iterator<Item = T>, limit: i64, offset: i64) -> Vec<T> {
    items
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.values().find(|u| u.username == username).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.values().find(|u| u.email == email).cloned())
    }

    async fn list_users(&self, limit: i64, offset: i64) -> StoreResult<Vec<User>> {
        let inner = self.inner.lock().await;
        let mut users: Vec<&User> = inner.users.values().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(users.into_iter().cloned(), limit, offset))
    }

    async fn create_user(&self, new: NewUser) -> StoreResult<User> {
        let mut inner = self.inner.lock().await;
        inner.check_unique(None, Some(&new.username), Some(&new.email))?;
        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            name: new.name,
            role: new.role,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, id: Uuid, changes: UserChanges) -> StoreResult<Option<User>> {
        let mut inner = self.inner.lock().await;
        if !inner.users.contains_key(&id) {
            return Ok(None);
        }
        inner.check_unique(Some(id), changes.username.as_deref(), changes.email.as_deref())?;
        let Some(user) = inner.users.get_mut(&id) else {
            return Ok(None);
        };
        changes.apply(user);
        Ok(Some(user.clone()))
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner.users.remove(&id).is_none() {
            return Ok(false);
        }
        inner.reset_tokens.retain(|t| t.user_id != id);
        for entry in inner.audit.iter_mut().filter(|e| e.actor_id == Some(id)) {
            entry.actor_id = None;
        }
        Ok(true)
    }

    async fn replace_reset_token(&self, new: NewResetToken) -> StoreResult<PasswordResetToken> {
        let mut inner = self.inner.lock().await;
        if inner.reset_tokens.iter().any(|t| t.token == new.token) {
            return Err(StoreError::Conflict("token"));
        }
        for outstanding in inner
            .reset_tokens
            .iter_mut()
            .filter(|t| t.user_id == new.user_id && t.used_at.is_none())
        {
            outstanding.used_at = Some(new.created_at);
        }
        let token = PasswordResetToken {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            token: new.token,
            expires_at: new.expires_at,
            used_at: None,
            created_at: new.created_at,
        };
        inner.reset_tokens.push(token.clone());
        Ok(token)
    }

    async fn find_reset_token(&self, token: &str) -> StoreResult<Option<PasswordResetToken>> {
        let inner = self.inner.lock().await;
        Ok(inner.reset_tokens.iter().find(|t| t.token == token).cloned())
    }

    async fn complete_password_reset(
        &self,
        token_id: Uuid,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(idx) = inner
            .reset_tokens
            .iter()
            .position(|t| t.id == token_id && t.is_valid(now))
        else {
            return Ok(false);
        };
        let user_id = inner.reset_tokens[idx].user_id;
        let Some(user) = inner.users.get_mut(&user_id) else {
            return Ok(false);
        };
        user.password_hash = password_hash.to_string();
        inner.reset_tokens[idx].used_at = Some(now);
        Ok(true)
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> StoreResult<AuditEntry> {
        let mut inner = self.inner.lock().await;
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            actor_id: entry.actor_id,
            action: entry.action.as_str().to_string(),
            target_type: entry.target_type.to_string(),
            target_id: entry.target_id,
            details: entry.details,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.audit.push(entry.clone());
        Ok(entry)
    }

    async fn list_audit(&self, limit: i64, offset: i64) -> StoreResult<Vec<AuditEntry>> {
        let inner = self.inner.lock().await;
        Ok(page(inner.audit.iter().rev().cloned(), limit, offset))
    }
}
