//! Configuration loader and validator for the catalog store.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub store: Store,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

impl App {
    /// `data_dir` with a leading `~/` expanded.
    pub fn resolved_data_dir(&self) -> String {
        match (self.data_dir.strip_prefix("~/"), std::env::var("HOME")) {
            (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
            _ => self.data_dir.clone(),
        }
    }
}

/// Key-value store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Store {
    pub database_file: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// How long refreshed catalog stats count as fresh.
    #[serde(default = "default_stats_ttl_seconds")]
    pub stats_ttl_seconds: u64,
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_stats_ttl_seconds() -> u64 {
    300
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// `DATABASE_URL` if set, else the SQLite file under `data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!(
                "sqlite://{}/{}",
                self.app.resolved_data_dir().trim_end_matches('/'),
                self.store.database_file
            )
        })
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.store.busy_timeout_ms)
    }

    pub fn stats_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.store.stats_ttl_seconds as i64)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.store.database_file.trim().is_empty() {
        return Err(ConfigError::Invalid("store.database_file must be non-empty"));
    }
    if cfg.store.database_file.contains('/') {
        return Err(ConfigError::Invalid("store.database_file must be a file name"));
    }
    if cfg.store.stats_ttl_seconds == 0 {
        return Err(ConfigError::Invalid("store.stats_ttl_seconds must be > 0"));
    }
    if cfg.store.stats_ttl_seconds > 365 * 24 * 3600 {
        return Err(ConfigError::Invalid("store.stats_ttl_seconds must be at most one year"));
    }
    Ok(())
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

store:
  database_file: "catalog.db"
  busy_timeout_ms: 5000
  stats_ttl_seconds: 300
"#
}
