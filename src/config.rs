use std::net::{IpAddr, SocketAddr};

use anyhow::{bail, Context};
use serde::Deserialize;

/// Fallback signing secret for local development. Refused in production.
pub const DEV_JWT_SECRET: &str = "adminhub-dev-secret-change-me";

/// Upper bound for any configured token lifetime: one year.
pub const MAX_TTL_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => bail!("APP_ENV must be development or production, got {other:?}"),
        }
    }

    /// Reset tokens are echoed back to the HTTP client only outside production.
    pub fn exposes_reset_tokens(self) -> bool {
        self == Self::Development
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Argon2 work factor.
#[derive(Debug, Clone, Deserialize)]
pub struct HashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminSeed {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub password_hash: HashConfig,
    pub reset_token_ttl_minutes: i64,
    pub admin_seed: Option<AdminSeed>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests don't touch the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match var("APP_ENV") {
            Some(raw) => Environment::parse(&raw)?,
            None => Environment::Development,
        };

        let secret = match (var("JWT_SECRET"), environment) {
            (Some(s), Environment::Production) if s == DEV_JWT_SECRET => {
                bail!("JWT_SECRET must not use the development fallback in production")
            }
            (Some(s), _) => s,
            (None, Environment::Production) => bail!("JWT_SECRET is required in production"),
            (None, Environment::Development) => {
                tracing::warn!("JWT_SECRET not set; using the development fallback secret");
                DEV_JWT_SECRET.to_string()
            }
        };

        let host = var("APP_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let ip: IpAddr = host
            .trim()
            .parse()
            .with_context(|| format!("APP_HOST must be an IP address, got {host:?}"))?;
        let bind_addr = SocketAddr::new(ip, parse_or(&var, "APP_PORT", 8080u16)?);

        let database_url = var("DATABASE_URL");
        if database_url.is_none() && environment == Environment::Production {
            bail!("DATABASE_URL is required in production");
        }

        let jwt = JwtConfig {
            secret,
            issuer: var("JWT_ISSUER").unwrap_or_else(|| "adminhub".into()),
            audience: var("JWT_AUDIENCE").unwrap_or_else(|| "adminhub-console".into()),
            ttl_minutes: parse_or(&var, "JWT_TTL_MINUTES", 60 * 24)?,
        };

        let defaults = HashConfig::default();
        let password_hash = HashConfig {
            memory_kib: parse_or(&var, "PASSWORD_HASH_MEMORY_KIB", defaults.memory_kib)?,
            iterations: parse_or(&var, "PASSWORD_HASH_ITERATIONS", defaults.iterations)?,
            parallelism: parse_or(&var, "PASSWORD_HASH_PARALLELISM", defaults.parallelism)?,
        };

        let admin_seed = match (
            var("ADMIN_USERNAME"),
            var("ADMIN_EMAIL"),
            var("ADMIN_PASSWORD"),
        ) {
            (Some(username), Some(email), Some(password)) => Some(AdminSeed {
                username,
                email,
                password,
            }),
            _ => None,
        };

        let config = Self {
            environment,
            bind_addr,
            database_url,
            jwt,
            password_hash,
            reset_token_ttl_minutes: parse_or(&var, "RESET_TOKEN_TTL_MINUTES", 60)?,
            admin_seed,
        };

        for (key, minutes) in [
            ("JWT_TTL_MINUTES", config.jwt.ttl_minutes),
            ("RESET_TOKEN_TTL_MINUTES", config.reset_token_ttl_minutes),
        ] {
            if !(1..=MAX_TTL_MINUTES).contains(&minutes) {
                bail!("{key} must be between 1 and {MAX_TTL_MINUTES} minutes, got {minutes}");
            }
        }
        Ok(config)
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn development_defaults() {
        let cfg = AppConfig::from_lookup(lookup(&[])).expect("dev config");
        assert_eq!(cfg.environment, Environment::Development);
        assert_eq!(cfg.jwt.secret, DEV_JWT_SECRET);
        assert_eq!(cfg.jwt.ttl_minutes, 1440);
        assert_eq!(cfg.reset_token_ttl_minutes, 60);
        assert!(cfg.database_url.is_none());
        assert!(cfg.admin_seed.is_none());
        assert_eq!(cfg.bind_addr, SocketAddr::from(([0, 0, 0, 0], 8080)));
    }

    #[test]
    fn listen_address_overrides() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("APP_HOST", "127.0.0.1"),
            ("APP_PORT", "3000"),
        ]))
        .expect("config");
        assert_eq!(cfg.bind_addr, SocketAddr::from(([127, 0, 0, 1], 3000)));

        let err = AppConfig::from_lookup(lookup(&[("APP_PORT", "99999")])).unwrap_err();
        assert!(err.to_string().contains("APP_PORT"));
        let err = AppConfig::from_lookup(lookup(&[("APP_HOST", "not a host")])).unwrap_err();
        assert!(err.to_string().contains("APP_HOST"));
    }

    #[test]
    fn production_requires_secret() {
        let err = AppConfig::from_lookup(lookup(&[
            ("APP_ENV", "production"),
            ("DATABASE_URL", "postgres://localhost/adminhub"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn production_rejects_dev_secret() {
        let err = AppConfig::from_lookup(lookup(&[
            ("APP_ENV", "production"),
            ("DATABASE_URL", "postgres://localhost/adminhub"),
            ("JWT_SECRET", DEV_JWT_SECRET),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("development fallback"));
    }

    #[test]
    fn production_requires_database() {
        let err = AppConfig::from_lookup(lookup(&[
            ("APP_ENV", "production"),
            ("JWT_SECRET", "s3cr3t-from-vault"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn parses_overrides_and_admin_seed() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("JWT_TTL_MINUTES", "30"),
            ("PASSWORD_HASH_ITERATIONS", "3"),
            ("ADMIN_USERNAME", "root"),
            ("ADMIN_EMAIL", "root@example.com"),
            ("ADMIN_PASSWORD", "changeme123"),
        ]))
        .expect("config");
        assert_eq!(cfg.jwt.ttl_minutes, 30);
        assert_eq!(cfg.password_hash.iterations, 3);
        assert_eq!(cfg.admin_seed.map(|s| s.username).as_deref(), Some("root"));
    }

    #[test]
    fn rejects_garbage_numbers() {
        let err = AppConfig::from_lookup(lookup(&[("JWT_TTL_MINUTES", "soon")])).unwrap_err();
        assert!(err.to_string().contains("JWT_TTL_MINUTES"));
    }

    #[test]
    fn token_lifetimes_are_bounded() {
        for (key, raw) in [
            ("JWT_TTL_MINUTES", "0"),
            ("JWT_TTL_MINUTES", "1000000000000"),
            ("RESET_TOKEN_TTL_MINUTES", "-5"),
            ("RESET_TOKEN_TTL_MINUTES", "1000000000000"),
        ] {
            let err = AppConfig::from_lookup(lookup(&[(key, raw)])).unwrap_err();
            assert!(err.to_string().contains(key), "{key}={raw}: {err}");
        }

        let max = MAX_TTL_MINUTES.to_string();
        let cfg = AppConfig::from_lookup(lookup(&[("JWT_TTL_MINUTES", max.as_str())]))
            .expect("one year is allowed");
        assert_eq!(cfg.jwt.ttl_minutes, MAX_TTL_MINUTES);
    }

    #[test]
    fn unknown_environment_is_an_error() {
        assert!(AppConfig::from_lookup(lookup(&[("APP_ENV", "staging")])).is_err());
    }
}
