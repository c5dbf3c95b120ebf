use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod services;

pub use extractors::{require_admin, require_auth, CurrentUser};

/// Public auth endpoints: login and the reset flow.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(crate::reset::handlers::reset_routes())
}
