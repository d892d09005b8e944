use std::path::PathBuf;

use anyhow::Context;
use relay_webdav::WebDavConfig;
use relay_webdav::config::DEFAULT_MAX_ATTEMPTS;

/// Process configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub webdav: WebDavConfig,
    /// Re-issue surviving pending transfers at startup.
    pub resume_pending: bool,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let host = var("RELAY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = var("RELAY_PORT")
            .unwrap_or_else(|| "3311".into())
            .parse()
            .context("RELAY_PORT")?;
        let db_path: PathBuf = var("RELAY_DB_PATH")
            .unwrap_or_else(|| "relay-settings.db".into())
            .into();
        let max_attempts: u32 = match var("RELAY_MAX_ATTEMPTS") {
            Some(v) => v.parse().context("RELAY_MAX_ATTEMPTS")?,
            None => DEFAULT_MAX_ATTEMPTS,
        };
        let resume_pending = var("RELAY_RESUME_PENDING")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(true);

        let webdav = WebDavConfig {
            base_url: var("RELAY_WEBDAV_URL").unwrap_or_default(),
            username: var("RELAY_WEBDAV_USERNAME").unwrap_or_default(),
            password: var("RELAY_WEBDAV_PASSWORD").unwrap_or_default(),
            remote_dir: var("RELAY_REMOTE_DIR").unwrap_or_default(),
            save_root: var("RELAY_SAVE_PATH").unwrap_or_default(),
            max_attempts,
            ..Default::default()
        };

        Ok(Self {
            host,
            port,
            db_path,
            webdav,
            resume_pending,
        })
    }
}
