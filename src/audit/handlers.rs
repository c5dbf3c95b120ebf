use axum::{extract::State, routing::get, Json, Router};
use tracing::instrument;

use crate::{
    error::AppError, extract::AppQuery, state::AppState, store::AuditEntry, users::Pagination,
};

/// Admin-only; the caller mounts these behind the role gate.
pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/audit-logs", get(list_audit_logs))
}

#[instrument(skip(state))]
pub async fn list_audit_logs(
    State(state): State<AppState>,
    AppQuery(p): AppQuery<Pagination>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    let (limit, offset) = p.bounds();
    Ok(Json(state.store.list_audit(limit, offset).await?))
}
