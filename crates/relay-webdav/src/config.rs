use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_USER_AGENT: &str = "MediaRelay/1.0";

/// Remote endpoint settings plus the executor's timing constants.
#[derive(Debug, Clone)]
pub struct WebDavConfig {
    /// Base URL of the WebDAV share. Empty means uploads are not configured.
    pub base_url: String,
    /// Basic auth is only sent when this is non-empty.
    pub username: String,
    pub password: String,
    /// Remote root prefixed to every relative path.
    pub remote_dir: String,
    /// Local root stripped from absolute file names.
    pub save_root: String,
    pub max_attempts: u32,
    pub connect_timeout: Duration,
    /// Whole-request ceiling; large videos need hours.
    pub request_timeout: Duration,
    /// Delay before re-issuing MKCOL on a locked collection.
    pub lock_wait: Duration,
    /// Retry `n` waits `backoff_unit * n`.
    pub backoff_unit: Duration,
    pub user_agent: String,
}

impl Default for WebDavConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password: String::new(),
            remote_dir: String::new(),
            save_root: String::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(7200),
            lock_wait: Duration::from_secs(1),
            backoff_unit: Duration::from_secs(2),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl WebDavConfig {
    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty()
    }

    /// Base URL without a trailing slash.
    pub fn base(&self) -> &str {
        self.base_url.trim().trim_end_matches('/')
    }
}
