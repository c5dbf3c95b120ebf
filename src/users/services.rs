use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::dto::{CreateUserRequest, Pagination, UpdateUserRequest};
use crate::{
    audit,
    auth::{dto::PublicUser, CurrentUser},
    error::{AppError, FieldErrors},
    state::AppState,
    store::{AuditAction, NewAuditEntry, NewUser, Role, UserChanges},
    validation::{check_email, check_name, check_password, check_username, normalize_email},
};

/// Rejects a username or email already held by someone other than `except`.
/// The store's unique constraints remain the final word under races.
pub(crate) async fn ensure_unique(
    state: &AppState,
    except: Option<Uuid>,
    username: Option<&str>,
    email: Option<&str>,
) -> Result<(), AppError> {
    if let Some(username) = username {
        if let Some(other) = state.store.find_user_by_username(username).await? {
            if Some(other.id) != except {
                return Err(AppError::Conflict("username"));
            }
        }
    }
    if let Some(email) = email {
        if let Some(other) = state.store.find_user_by_email(email).await? {
            if Some(other.id) != except {
                return Err(AppError::Conflict("email"));
            }
        }
    }
    Ok(())
}

pub async fn list_users(state: &AppState, page: &Pagination) -> Result<Vec<PublicUser>, AppError> {
    let (limit, offset) = page.bounds();
    let users = state.store.list_users(limit, offset).await?;
    Ok(users.into_iter().map(PublicUser::from).collect())
}

pub async fn get_user(state: &AppState, id: Uuid) -> Result<PublicUser, AppError> {
    state
        .store
        .find_user_by_id(id)
        .await?
        .map(PublicUser::from)
        .ok_or(AppError::NotFound("user"))
}

pub async fn create_user(
    state: &AppState,
    actor: &CurrentUser,
    req: CreateUserRequest,
) -> Result<PublicUser, AppError> {
    let username = req.username.trim().to_string();
    let email = normalize_email(&req.email);
    let name = req.name.trim().to_string();

    let mut errors = FieldErrors::new();
    check_username(&mut errors, "username", &username);
    check_email(&mut errors, "email", &email);
    check_password(&mut errors, "password", &req.password);
    check_name(&mut errors, "name", &name);
    errors.into_result()?;

    ensure_unique(state, None, Some(&username), Some(&email)).await?;

    let password_hash = state.hasher.hash_blocking(&req.password).await?;
    let user = state
        .store
        .create_user(NewUser {
            username,
            email,
            password_hash,
            name,
            role: req.role.unwrap_or(Role::User),
        })
        .await?;

    audit::record(
        state,
        NewAuditEntry {
            actor_id: Some(actor.id),
            action: AuditAction::CreateUser,
            target_type: "user",
            target_id: Some(user.id),
            details: json!({ "username": user.username, "role": user.role }),
        },
    )
    .await;

    info!(actor_id = %actor.id, user_id = %user.id, "user created");
    Ok(PublicUser::from(user))
}

pub async fn update_user(
    state: &AppState,
    actor: &CurrentUser,
    id: Uuid,
    req: UpdateUserRequest,
) -> Result<PublicUser, AppError> {
    let username = req.username.map(|u| u.trim().to_string());
    let email = req.email.as_deref().map(normalize_email);
    let name = req.name.map(|n| n.trim().to_string());

    let mut errors = FieldErrors::new();
    if let Some(username) = &username {
        check_username(&mut errors, "username", username);
    }
    if let Some(email) = &email {
        check_email(&mut errors, "email", email);
    }
    if let Some(name) = &name {
        check_name(&mut errors, "name", name);
    }
    if let Some(password) = &req.password {
        check_password(&mut errors, "password", password);
    }
    if id == actor.id && req.role.is_some_and(|r| r != actor.role) {
        errors.add("role", "You cannot change your own role");
    }
    errors.into_result()?;

    if state.store.find_user_by_id(id).await?.is_none() {
        return Err(AppError::NotFound("user"));
    }
    ensure_unique(state, Some(id), username.as_deref(), email.as_deref()).await?;

    let password_hash = match &req.password {
        Some(p) => Some(state.hasher.hash_blocking(p).await?),
        None => None,
    };
    let changes = UserChanges {
        username,
        email,
        name,
        role: req.role,
        password_hash,
    };
    let changed = changes.changed_fields();

    let updated = if changes.is_empty() {
        state.store.find_user_by_id(id).await?
    } else {
        state.store.update_user(id, changes).await?
    };
    let user = updated.ok_or(AppError::NotFound("user"))?;

    if !changed.is_empty() {
        audit::record(
            state,
            NewAuditEntry {
                actor_id: Some(actor.id),
                action: AuditAction::UpdateUser,
                target_type: "user",
                target_id: Some(id),
                details: json!({ "fields": changed }),
            },
        )
        .await;
        info!(actor_id = %actor.id, user_id = %id, ?changed, "user updated");
    }
    Ok(PublicUser::from(user))
}

pub async fn delete_user(state: &AppState, actor: &CurrentUser, id: Uuid) -> Result<(), AppError> {
    if id == actor.id {
        return Err(AppError::Validation(FieldErrors::single(
            "id",
            "You cannot delete your own account",
        )));
    }
    let Some(user) = state.store.find_user_by_id(id).await? else {
        return Err(AppError::NotFound("user"));
    };
    if !state.store.delete_user(id).await? {
        return Err(AppError::NotFound("user"));
    }

    audit::record(
        state,
        NewAuditEntry {
            actor_id: Some(actor.id),
            action: AuditAction::DeleteUser,
            target_type: "user",
            target_id: Some(id),
            details: json!({ "username": user.username }),
        },
    )
    .await;

    info!(actor_id = %actor.id, user_id = %id, "user deleted");
    Ok(())
}

/// Creates the configured bootstrap admin unless that username already
/// exists. Returns true when an account was created.
pub async fn seed_admin(state: &AppState) -> anyhow::Result<bool> {
    let Some(seed) = &state.config.admin_seed else {
        return Ok(false);
    };
    if state
        .store
        .find_user_by_username(&seed.username)
        .await?
        .is_some()
    {
        return Ok(false);
    }

    let email = normalize_email(&seed.email);
    let mut errors = FieldErrors::new();
    check_username(&mut errors, "ADMIN_USERNAME", &seed.username);
    check_email(&mut errors, "ADMIN_EMAIL", &email);
    check_password(&mut errors, "ADMIN_PASSWORD", &seed.password);
    if !errors.is_empty() {
        anyhow::bail!("invalid bootstrap admin settings: {errors:?}");
    }

    let password_hash = state.hasher.hash_blocking(&seed.password).await?;
    let user = state
        .store
        .create_user(NewUser {
            username: seed.username.clone(),
            email,
            password_hash,
            name: "Administrator".into(),
            role: Role::Admin,
        })
        .await?;
    info!(user_id = %user.id, username = %user.username, "bootstrap admin created");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin_actor(id: Uuid) -> CurrentUser {
        CurrentUser {
            id,
            username: "root".into(),
            role: Role::Admin,
        }
    }

    fn create_req(username: &str, email: &str) -> CreateUserRequest {
        CreateUserRequest {
            username: username.into(),
            email: email.into(),
            password: "pw123456".into(),
            name: "Someone".into(),
            role: None,
        }
    }

    #[tokio::test]
    async fn create_defaults_to_user_role_and_normalizes_email() {
        let state = AppState::fake();
        let actor = admin_actor(Uuid::new_v4());
        let user = create_user(&state, &actor, create_req("alice", " Alice@Example.com"))
            .await
            .unwrap();
        assert_eq!(user.role, Role::User);
        assert_eq!(user.email, "alice@example.com");

        let audit = state.store.list_audit(10, 0).await.unwrap();
        assert_eq!(audit[0].action, "create_user");
    }

    #[tokio::test]
    async fn create_rejects_duplicates() {
        let state = AppState::fake();
        let actor = admin_actor(Uuid::new_v4());
        create_user(&state, &actor, create_req("alice", "a@example.com"))
            .await
            .unwrap();

        let err = create_user(&state, &actor, create_req("alice", "other@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict("username")));

        let err = create_user(&state, &actor, create_req("bob", "A@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict("email")));
    }

    #[tokio::test]
    async fn create_reports_every_bad_field() {
        let state = AppState::fake();
        let actor = admin_actor(Uuid::new_v4());
        let err = create_user(
            &state,
            &actor,
            CreateUserRequest {
                username: "x".into(),
                email: "nope".into(),
                password: "short".into(),
                name: " ".into(),
                role: None,
            },
        )
        .await
        .unwrap_err();
        let AppError::Validation(fields) = err else {
            panic!("expected validation error");
        };
        for field in ["username", "email", "password", "name"] {
            assert!(fields.contains(field), "missing {field}");
        }
    }

    #[tokio::test]
    async fn update_checks_email_against_others_only() {
        let state = AppState::fake();
        let actor = admin_actor(Uuid::new_v4());
        let alice = create_user(&state, &actor, create_req("alice", "a@example.com"))
            .await
            .unwrap();
        create_user(&state, &actor, create_req("bob", "b@example.com"))
            .await
            .unwrap();

        let same = update_user(
            &state,
            &actor,
            alice.id,
            UpdateUserRequest {
                email: Some("a@example.com".into()),
                ..Default::default()
            },
        )
        .await;
        assert!(same.is_ok());

        let taken = update_user(
            &state,
            &actor,
            alice.id,
            UpdateUserRequest {
                email: Some("b@example.com".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(taken, AppError::Conflict("email")));
    }

    #[tokio::test]
    async fn admin_cannot_demote_or_delete_self() {
        let state = AppState::fake();
        let bootstrap = admin_actor(Uuid::new_v4());
        let root = create_user(
            &state,
            &bootstrap,
            CreateUserRequest {
                role: Some(Role::Admin),
                ..create_req("root", "root@example.com")
            },
        )
        .await
        .unwrap();
        let me = admin_actor(root.id);

        let err = update_user(
            &state,
            &me,
            root.id,
            UpdateUserRequest {
                role: Some(Role::User),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = delete_user(&state, &me, root.id).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(get_user(&state, root.id).await.is_ok());
    }

    #[tokio::test]
    async fn update_password_and_role_of_another_user() {
        let state = AppState::fake();
        let actor = admin_actor(Uuid::new_v4());
        let alice = create_user(&state, &actor, create_req("alice", "a@example.com"))
            .await
            .unwrap();

        let updated = update_user(
            &state,
            &actor,
            alice.id,
            UpdateUserRequest {
                role: Some(Role::Admin),
                password: Some("newpw123".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.role, Role::Admin);

        let audit = state.store.list_audit(1, 0).await.unwrap();
        assert_eq!(audit[0].action, "update_user");
        assert_eq!(audit[0].details["fields"], json!(["role", "password"]));

        assert!(crate::auth::services::login(&state, "alice", "newpw123")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn missing_user_is_not_found() {
        let state = AppState::fake();
        let actor = admin_actor(Uuid::new_v4());
        let ghost = Uuid::new_v4();
        assert!(matches!(
            get_user(&state, ghost).await,
            Err(AppError::NotFound("user"))
        ));
        assert!(matches!(
            update_user(&state, &actor, ghost, UpdateUserRequest::default()).await,
            Err(AppError::NotFound("user"))
        ));
        assert!(matches!(
            delete_user(&state, &actor, ghost).await,
            Err(AppError::NotFound("user"))
        ));
    }

    #[tokio::test]
    async fn seed_admin_runs_once() {
        let mut state = AppState::fake();
        let mut config = (*state.config).clone();
        config.admin_seed = Some(crate::config::AdminSeed {
            username: "root".into(),
            email: "Root@Example.com".into(),
            password: "rootpass1".into(),
        });
        state.config = std::sync::Arc::new(config);

        assert!(seed_admin(&state).await.unwrap());
        assert!(!seed_admin(&state).await.unwrap());
        let root = state.store.find_user_by_username("root").await.unwrap().unwrap();
        assert_eq!(root.role, Role::Admin);
        assert_eq!(root.email, "root@example.com");
    }
}
