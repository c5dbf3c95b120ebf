mod app;
mod audit;
mod auth;
mod config;
mod error;
mod extract;
mod profile;
mod reset;
mod state;
mod store;
mod users;
mod validation;

use crate::{config::AppConfig, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "adminhub=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    tracing::info!(environment = ?config.environment, "starting adminhub");

    let bind_addr = config.bind_addr;
    let app_state = AppState::init(config).await?;
    users::services::seed_admin(&app_state).await?;

    app::serve(app::build_app(app_state), bind_addr).await
}
