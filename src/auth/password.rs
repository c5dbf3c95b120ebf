use std::sync::Arc;

use anyhow::Context;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use tracing::{error, warn};

use crate::config::HashConfig;

/// Argon2id hashing with a configured work factor.
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
    /// Verified against when the account does not exist, so a miss costs the
    /// same as a wrong password.
    dummy_hash: Arc<str>,
}

impl PasswordHasher {
    pub fn new(cfg: &HashConfig) -> anyhow::Result<Self> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, cfg.parallelism, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 params: {e}"))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut hasher = Self {
            argon2,
            dummy_hash: Arc::from(""),
        };
        hasher.dummy_hash = Arc::from(hasher.hash("dummy-password-for-timing")?);
        Ok(hasher)
    }

    pub fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// Malformed stored hashes verify as false.
    pub fn verify(&self, plain: &str, hash: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "argon2 parse hash error");
                return false;
            }
        };
        self.argon2
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok()
    }

    /// Runs a verification against the dummy hash and always reports false.
    pub fn verify_dummy(&self, plain: &str) -> bool {
        let _ = self.verify(plain, &self.dummy_hash);
        false
    }

    /// Hashes on the blocking pool.
    pub async fn hash_blocking(&self, plain: &str) -> anyhow::Result<String> {
        let hasher = self.clone();
        let plain = plain.to_owned();
        tokio::task::spawn_blocking(move || hasher.hash(&plain))
            .await
            .context("hash task panicked")?
    }

    /// Verifies on the blocking pool. `None` hash runs the dummy comparison.
    pub async fn verify_blocking(&self, plain: &str, hash: Option<&str>) -> anyhow::Result<bool> {
        let hasher = self.clone();
        let plain = plain.to_owned();
        let hash = hash.map(str::to_owned);
        tokio::task::spawn_blocking(move || match hash {
            Some(h) => hasher.verify(&plain, &h),
            None => hasher.verify_dummy(&plain),
        })
        .await
        .context("verify task panicked")
    }
}

#[cfg(test)]
pub(crate) fn cheap_params() -> HashConfig {
    HashConfig {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
    }
}
