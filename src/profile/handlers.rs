use axum::{
    extract::State,
    routing::{get, put},
    Json, Router,
};
use tracing::instrument;

use super::services::{self, UpdateProfileRequest};
use crate::{
    auth::{dto::PublicUser, CurrentUser},
    error::AppError,
    extract::AppJson,
    state::AppState,
};

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me))
        .route("/profile", put(update_profile))
}

#[instrument(skip(state), fields(user_id = %me.id))]
pub async fn get_me(
    State(state): State<AppState>,
    me: CurrentUser,
) -> Result<Json<PublicUser>, AppError> {
    Ok(Json(services::get_me(&state, &me).await?))
}

#[instrument(skip(state, payload), fields(user_id = %me.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    me: CurrentUser,
    AppJson(payload): AppJson<UpdateProfileRequest>,
) -> Result<Json<PublicUser>, AppError> {
    Ok(Json(services::update_profile(&state, &me, payload).await?))
}
