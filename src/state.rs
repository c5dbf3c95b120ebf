use std::sync::Arc;

use crate::auth::{jwt::TokenCodec, password::PasswordHasher};
use crate::config::AppConfig;
use crate::store::{CredentialStore, MemoryStore, PgStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn CredentialStore>,
    pub codec: Arc<TokenCodec>,
    pub hasher: PasswordHasher,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn CredentialStore> = match &config.database_url {
            Some(url) => {
                let pg = PgStore::connect(url).await?;
                pg.migrate().await?;
                Arc::new(pg)
            }
            None => {
                tracing::warn!("DATABASE_URL not set; using the in-memory store");
                Arc::new(MemoryStore::new())
            }
        };
        Self::from_parts(config, store)
    }

    pub fn from_parts(config: AppConfig, store: Arc<dyn CredentialStore>) -> anyhow::Result<Self> {
        let codec = Arc::new(TokenCodec::new(&config.jwt));
        let hasher = PasswordHasher::new(&config.password_hash)?;
        Ok(Self {
            config: Arc::new(config),
            store,
            codec,
            hasher,
        })
    }

    /// In-memory state with cheap hashing, for tests.
    #[cfg(test)]
    pub fn fake() -> Self {
        Self::fake_with_store(Arc::new(MemoryStore::new()))
    }

    #[cfg(test)]
    pub fn fake_with_store(store: Arc<dyn CredentialStore>) -> Self {
        let config = AppConfig {
            environment: crate::config::Environment::Development,
            bind_addr: std::net::SocketAddr::from(([127, 0, 0, 1], 0)),
            database_url: None,
            jwt: crate::config::JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 60 * 24,
            },
            password_hash: crate::auth::password::cheap_params(),
            reset_token_ttl_minutes: 60,
            admin_seed: None,
        };
        Self::from_parts(config, store).expect("fake state")
    }
}
