//! Configuration loader and validator for the offline sync engine.
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
    pub api: Api,
    pub probe: Probe,
    pub cache: Cache,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub restored_banner_ms: u64,
}

/// Rental backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Api {
    pub base_url: String,
    pub timeout_ms: u64,
}

/// Reachability probe settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Probe {
    pub endpoint: String,
    pub interval_ms: u64,
}

/// Cache validity windows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cache {
    pub vehicles_ttl_ms: u64,
    pub profile_ttl_ms: u64,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Device database URL: `DATABASE_URL` when set, otherwise a file under
    /// `app.data_dir` that is created on first open.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/rentsync.db?mode=rwc", self.app.data_dir))
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api.timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe.interval_ms)
    }

    pub fn restored_banner(&self) -> Duration {
        Duration::from_millis(self.app.restored_banner_ms)
    }

    pub fn vehicles_ttl(&self) -> Duration {
        Duration::from_millis(self.cache.vehicles_ttl_ms)
    }

    pub fn profile_ttl(&self) -> Duration {
        Duration::from_millis(self.cache.profile_ttl_ms)
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
    // restored_banner_ms may be 0; the banner then clears immediately

    if cfg.api.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("api.base_url must be non-empty"));
    }
    if !cfg.api.base_url.ends_with('/') {
        return Err(ConfigError::Invalid("api.base_url must end with '/'"));
    }
    if cfg.api.timeout_ms == 0 {
        return Err(ConfigError::Invalid("api.timeout_ms must be > 0"));
    }

    if cfg.probe.endpoint.trim().is_empty() {
        return Err(ConfigError::Invalid("probe.endpoint must be non-empty"));
    }
    if cfg.probe.interval_ms == 0 {
        return Err(ConfigError::Invalid("probe.interval_ms must be > 0"));
    }

    if cfg.cache.vehicles_ttl_ms == 0 {
        return Err(ConfigError::Invalid("cache.vehicles_ttl_ms must be > 0"));
    }
    if cfg.cache.profile_ttl_ms == 0 {
        return Err(ConfigError::Invalid("cache.profile_ttl_ms must be > 0"));
    }

    Ok(())
}

/// Example configuration shipped with the binary.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  restored_banner_ms: 3000

api:
  # must end with a slash so endpoint paths join under it
  base_url: "https://api.rentgo.example/v1/"
  timeout_ms: 10000

probe:
  endpoint: "https://api.rentgo.example/v1/health"
  interval_ms: 5000

cache:
  vehicles_ttl_ms: 300000
  profile_ttl_ms: 600000
"#
}
