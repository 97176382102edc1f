use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Duration;

use murmur_api::state::AuthSettings;

/// Runtime settings, read from `MURMUR_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub auth: AuthSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = var("MURMUR_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parsed(&var, "MURMUR_PORT", 8000u16)?;
        let db_path = PathBuf::from(var("MURMUR_DB_PATH").unwrap_or_else(|| "murmur.db".into()));

        let defaults = AuthSettings::default();
        let auth = AuthSettings {
            session_ttl: Duration::days(parsed(&var, "MURMUR_SESSION_TTL_DAYS", defaults.session_ttl.num_days())?),
            code_ttl: Duration::minutes(parsed(&var, "MURMUR_CODE_TTL_MINUTES", defaults.code_ttl.num_minutes())?),
            expose_codes: parsed(&var, "MURMUR_EXPOSE_VERIFICATION_CODES", defaults.expose_codes)?,
        };
        if auth.session_ttl <= Duration::zero() || auth.code_ttl <= Duration::zero() {
            anyhow::bail!("session and code lifetimes must be positive");
        }

        Ok(Self {
            host,
            port,
            db_path,
            auth,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parsed<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("invalid {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
