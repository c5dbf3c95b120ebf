use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{CreateUserRequest, Pagination, UpdateUserRequest},
    services,
};
use crate::{
    auth::{dto::PublicUser, CurrentUser},
    error::AppError,
    extract::{AppJson, AppPath, AppQuery},
    state::AppState,
};

/// Admin-only; the caller mounts these behind the role gate.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).patch(update_user).delete(delete_user),
        )
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    AppQuery(p): AppQuery<Pagination>,
) -> Result<Json<Vec<PublicUser>>, AppError> {
    Ok(Json(services::list_users(&state, &p).await?))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<PublicUser>, AppError> {
    Ok(Json(services::get_user(&state, id).await?))
}

#[instrument(skip(state, payload), fields(actor_id = %actor.id))]
pub async fn create_user(
    State(state): State<AppState>,
    actor: CurrentUser,
    AppJson(payload): AppJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<PublicUser>), AppError> {
    let user = services::create_user(&state, &actor, payload).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[instrument(skip(state, payload), fields(actor_id = %actor.id))]
pub async fn update_user(
    State(state): State<AppState>,
    actor: CurrentUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdateUserRequest>,
) -> Result<Json<PublicUser>, AppError> {
    Ok(Json(services::update_user(&state, &actor, id, payload).await?))
}

#[instrument(skip(state), fields(actor_id = %actor.id))]
pub async fn delete_user(
    State(state): State<AppState>,
    actor: CurrentUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<StatusCode, AppError> {
    services::delete_user(&state, &actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
