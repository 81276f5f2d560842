use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use agora_types::models::TallyMode;

/// Secrets that are fine for local hacking and nothing else.
pub const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub tally_mode: TallyMode,
    pub admin_usernames: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        let port: u16 = get("AGORA_PORT", "3000")
            .parse()
            .context("AGORA_PORT must be a port number")?;

        let tally_mode = match lookup("AGORA_TALLY_MODE") {
            Some(raw) => raw.parse::<TallyMode>().map_err(|e: String| anyhow!("AGORA_TALLY_MODE: {}", e))?,
            None => TallyMode::default(),
        };

        let admin_usernames = get("AGORA_ADMIN_USERNAMES", "")
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            host: get("AGORA_HOST", "0.0.0.0"),
            port,
            db_path: get("AGORA_DB_PATH", "agora.db").into(),
            jwt_secret: get("AGORA_JWT_SECRET", "dev-secret-change-me"),
            tally_mode,
            admin_usernames,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    pub fn has_placeholder_secret(&self) -> bool {
        self.jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&self.jwt_secret.as_str())
    }
}
