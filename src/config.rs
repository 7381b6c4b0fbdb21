//! Configuration loader and validator for the catalog sync engine.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::sync::SyncOptions;

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
    pub sync: SyncSettings,
    pub marketplace: Marketplace,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Sync cycle tuning. Everything except the interval has a default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSettings {
    pub interval_secs: u64,
    #[serde(default = "default_max_items")]
    pub max_items: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub include_failed: bool,
    #[serde(default = "default_chunk_pause_ms")]
    pub chunk_pause_ms: u64,
    #[serde(default = "default_max_batches")]
    pub max_batches: usize,
    #[serde(default = "default_max_poll_cycles")]
    pub max_poll_cycles: u32,
    #[serde(default = "default_poll_concurrency")]
    pub poll_concurrency: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_max_items() -> u32 {
    100
}
fn default_batch_size() -> usize {
    10
}
fn default_chunk_pause_ms() -> u64 {
    500
}
fn default_max_batches() -> usize {
    100
}
fn default_max_poll_cycles() -> u32 {
    10
}
fn default_poll_concurrency() -> usize {
    4
}
fn default_request_timeout_secs() -> u64 {
    30
}

/// Marketplace seller API credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Marketplace {
    pub base_url: String,
    pub supplier_id: String,
    pub api_key: String,
    pub api_secret: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// `DATABASE_URL` wins over the file under `app.data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!(
                "sqlite://{}/catalog_sync.db",
                self.app.data_dir.trim_end_matches('/')
            )
        })
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.request_timeout_secs)
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            max_items: self.sync.max_items,
            batch_size: self.sync.batch_size,
            include_failed: self.sync.include_failed,
            dry_run: false,
            chunk_pause: Duration::from_millis(self.sync.chunk_pause_ms),
            request_timeout: self.request_timeout(),
            max_batches: self.sync.max_batches,
            max_poll_cycles: self.sync.max_poll_cycles,
            poll_concurrency: self.sync.poll_concurrency,
        }
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

    let s = &cfg.sync;
    if s.interval_secs == 0 {
        return Err(ConfigError::Invalid("sync.interval_secs must be > 0"));
    }
    if s.max_items == 0 {
        return Err(ConfigError::Invalid("sync.max_items must be > 0"));
    }
    if s.batch_size == 0 {
        return Err(ConfigError::Invalid("sync.batch_size must be > 0"));
    }
    if s.max_batches == 0 {
        return Err(ConfigError::Invalid("sync.max_batches must be > 0"));
    }
    if s.max_poll_cycles == 0 {
        return Err(ConfigError::Invalid("sync.max_poll_cycles must be > 0"));
    }
    if s.poll_concurrency == 0 {
        return Err(ConfigError::Invalid("sync.poll_concurrency must be > 0"));
    }
    if s.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid("sync.request_timeout_secs must be > 0"));
    }

    let m = &cfg.marketplace;
    if m.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("marketplace.base_url must be non-empty"));
    }
    if m.supplier_id.trim().is_empty() {
        return Err(ConfigError::Invalid("marketplace.supplier_id must be non-empty"));
    }
    if m.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("marketplace.api_key must be non-empty"));
    }
    if m.api_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("marketplace.api_secret must be non-empty"));
    }

    Ok(())
}

/// Example configuration with every key spelled out.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

sync:
  interval_secs: 43200
  max_items: 100
  batch_size: 10
  include_failed: false
  chunk_pause_ms: 500
  max_batches: 100
  max_poll_cycles: 10
  poll_concurrency: 4
  request_timeout_secs: 30

marketplace:
  base_url: "https://api.trendyol.com/sapigw/"
  supplier_id: "123456"
  api_key: "YOUR_API_KEY"
  api_secret: "YOUR_API_SECRET"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.sync.interval_secs, 43200);
    }

    #[test]
    fn sync_defaults_fill_missing_keys() {
        let raw = r#"app:
  data_dir: "./data"
sync:
  interval_secs: 60
marketplace:
  base_url: "http://localhost/"
  supplier_id: "1"
  api_key: "k"
  api_secret: "s"
"#;
        let cfg: Config = serde_yaml::from_str(raw).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.sync.batch_size, 10);
        assert_eq!(cfg.sync.max_poll_cycles, 10);
        assert!(!cfg.sync.include_failed);

        let opts = cfg.sync_options();
        assert_eq!(opts.chunk_pause, Duration::from_millis(500));
        assert_eq!(opts.request_timeout, Duration::from_secs(30));
        assert!(!opts.dry_run);
    }

    #[test]
    fn invalid_credentials() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.marketplace.api_key = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("api_key")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.marketplace.supplier_id = " ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_sync_limits() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sync.batch_size = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("batch_size")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sync.max_poll_cycles = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sync.interval_secs = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.marketplace.supplier_id, "123456");
    }
}
