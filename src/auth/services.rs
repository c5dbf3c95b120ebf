use serde_json::json;
use tracing::{info, warn};

use crate::{
    audit,
    auth::dto::{LoginResponse, PublicUser},
    error::AppError,
    state::AppState,
    store::{AuditAction, NewAuditEntry},
};

/// Verifies credentials and issues a session token.
///
/// Unknown username and wrong password take the same path and produce the
/// same `InvalidCredentials`; a missing account still pays for one hash
/// verification.
pub async fn login(
    state: &AppState,
    username: &str,
    password: &str,
) -> Result<LoginResponse, AppError> {
    let candidate = state.store.find_user_by_username(username).await?;

    let verified = state
        .hasher
        .verify_blocking(password, candidate.as_ref().map(|u| u.password_hash.as_str()))
        .await?;

    let Some(user) = candidate.filter(|_| verified) else {
        warn!("login rejected");
        return Err(AppError::InvalidCredentials);
    };

    let token = state.codec.issue(user.id, &user.username, user.role)?;

    audit::record(
        state,
        NewAuditEntry {
            actor_id: Some(user.id),
            action: AuditAction::Login,
            target_type: "user",
            target_id: Some(user.id),
            details: json!({ "username": user.username }),
        },
    )
    .await;

    info!(user_id = %user.id, role = %user.role, "user logged in");
    Ok(LoginResponse {
        token,
        user: PublicUser::from(user),
    })
}
