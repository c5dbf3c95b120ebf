use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use super::{
    dto::{
        RequestResetRequest, RequestResetResponse, ResetPasswordRequest, SuccessResponse,
        VerifyTokenQuery, VerifyTokenResponse,
    },
    services,
};
use crate::{
    error::AppError,
    extract::{AppJson, AppQuery},
    state::AppState,
};

const RESET_REQUESTED: &str = "If an account exists for that email, a reset link has been sent";

pub fn reset_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/request-password-reset", post(request_password_reset))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/verify-reset-token", get(verify_reset_token))
}

#[instrument(skip(state, payload))]
pub async fn request_password_reset(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RequestResetRequest>,
) -> Result<Json<RequestResetResponse>, AppError> {
    let issued = services::request_reset(&state, &payload.email).await?;

    let token = match issued {
        Some(reset) if state.config.environment.exposes_reset_tokens() => Some(reset.token),
        Some(reset) => {
            // Mail delivery is an external collaborator; the value is never logged.
            info!(expires_at = %reset.expires_at, "reset token ready for delivery");
            None
        }
        None => None,
    };

    Ok(Json(RequestResetResponse {
        success: true,
        message: RESET_REQUESTED,
        token,
    }))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    AppJson(payload): AppJson<ResetPasswordRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    services::complete_reset(&state, &payload.token, &payload.new_password).await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[instrument(skip(state, query))]
pub async fn verify_reset_token(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<VerifyTokenQuery>,
) -> Result<Json<VerifyTokenResponse>, AppError> {
    let valid = services::verify_token(&state, &query.token).await?;
    Ok(Json(VerifyTokenResponse { valid }))
}
