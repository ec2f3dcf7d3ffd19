//! Configuration and wiring helpers for the `termlinkd` daemon binary.

use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DB_PATH: &str = "data/sessions.db";
pub const DEFAULT_LOG_DIR: &str = "data/logs";

/// Daemon configuration, sourced from environment variables with defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
    pub max_sessions_per_user: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            max_sessions_per_user: tl_session::DEFAULT_MAX_SESSIONS_PER_USER,
        }
    }
}

impl ServerConfig {
    /// Reads `PORT`, `DB_PATH`, `LOG_DIR` and `TERMLINK_MAX_SESSIONS`,
    /// falling back to the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(port) = env_parse::<u16>("PORT") {
            config.port = port;
        }
        if let Ok(db_path) = std::env::var("DB_PATH") {
            if !db_path.is_empty() {
                config.db_path = PathBuf::from(db_path);
            }
        }
        if let Ok(log_dir) = std::env::var("LOG_DIR") {
            if !log_dir.is_empty() {
                config.log_dir = PathBuf::from(log_dir);
            }
        }
        if let Some(max) = env_parse::<usize>("TERMLINK_MAX_SESSIONS") {
            if max > 0 {
                config.max_sessions_per_user = max;
            }
        }
        config
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    /// Creates the database parent directory and the log directory.
    pub fn ensure_data_dirs(&self) -> std::io::Result<()> {
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::create_dir_all(&self.log_dir)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}
