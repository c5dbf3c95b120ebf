use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    audit,
    auth::{dto::PublicUser, CurrentUser},
    error::{AppError, FieldErrors},
    state::AppState,
    store::{AuditAction, NewAuditEntry, UserChanges},
    users::services::ensure_unique,
    validation::{check_email, check_name, check_password, normalize_email},
};

/// Self-service changes. Role is not accepted here.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(alias = "current_password")]
    pub current_password: Option<String>,
    #[serde(alias = "new_password")]
    pub new_password: Option<String>,
}

pub async fn get_me(state: &AppState, me: &CurrentUser) -> Result<PublicUser, AppError> {
    // A valid token can outlive its account.
    state
        .store
        .find_user_by_id(me.id)
        .await?
        .map(PublicUser::from)
        .ok_or(AppError::Unauthorized)
}

pub async fn update_profile(
    state: &AppState,
    me: &CurrentUser,
    req: UpdateProfileRequest,
) -> Result<PublicUser, AppError> {
    let name = req.name.map(|n| n.trim().to_string());
    let email = req.email.as_deref().map(normalize_email);

    let mut errors = FieldErrors::new();
    if let Some(name) = &name {
        check_name(&mut errors, "name", name);
    }
    if let Some(email) = &email {
        check_email(&mut errors, "email", email);
    }
    let password_change = match (&req.current_password, &req.new_password) {
        (None, None) => None,
        (Some(current), Some(new)) => {
            check_password(&mut errors, "new_password", new);
            Some((current.as_str(), new.as_str()))
        }
        (Some(_), None) => {
            errors.add("new_password", "New password is required to change password");
            None
        }
        (None, Some(_)) => {
            errors.add(
                "current_password",
                "Current password is required to change password",
            );
            None
        }
    };
    errors.into_result()?;

    let Some(user) = state.store.find_user_by_id(me.id).await? else {
        return Err(AppError::Unauthorized);
    };
    ensure_unique(state, Some(me.id), None, email.as_deref()).await?;

    let password_hash = match password_change {
        Some((current, new)) => {
            let ok = state
                .hasher
                .verify_blocking(current, Some(&user.password_hash))
                .await?;
            if !ok {
                warn!(user_id = %me.id, "profile password change with wrong current password");
                return Err(AppError::Validation(FieldErrors::single(
                    "current_password",
                    "Current password is incorrect",
                )));
            }
            Some(state.hasher.hash_blocking(new).await?)
        }
        None => None,
    };
    let password_changed = password_hash.is_some();

    let changes = UserChanges {
        name,
        email,
        password_hash,
        ..Default::default()
    };
    if changes.is_empty() {
        return Ok(PublicUser::from(user));
    }
    let fields = changes.changed_fields();

    let user = state
        .store
        .update_user(me.id, changes)
        .await?
        .ok_or(AppError::Unauthorized)?;

    audit::record(
        state,
        NewAuditEntry {
            actor_id: Some(me.id),
            action: AuditAction::UpdateProfile,
            target_type: "user",
            target_id: Some(me.id),
            details: json!({ "fields": fields }),
        },
    )
    .await;
    if password_changed {
        audit::record(
            state,
            NewAuditEntry {
                actor_id: Some(me.id),
                action: AuditAction::ChangePassword,
                target_type: "user",
                target_id: Some(me.id),
                details: json!({}),
            },
        )
        .await;
    }

    info!(user_id = %me.id, ?fields, "profile updated");
    Ok(PublicUser::from(user))
}
