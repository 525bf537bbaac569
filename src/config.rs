//! Configuration loader and validator for the article sync client.
use reqwest::Url;
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
    pub remote: Remote,
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Remote article API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Remote {
    pub base_url: String,
    pub timeout_seconds: u64,
    pub user_agent: String,
}

/// List paging and search behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSettings {
    pub page_size: u32,
    pub search_debounce_ms: u64,
}

/// Accepted search debounce window, in milliseconds.
pub const SEARCH_DEBOUNCE_RANGE_MS: std::ops::RangeInclusive<u64> = 250..=300;

impl SyncSettings {
    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.app.data_dir)
    }

    /// `DATABASE_URL` wins over the file under `app.data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!(
                "sqlite://{}/articles.db",
                self.app.data_dir.trim_end_matches('/')
            )
        })
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

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    match Url::parse(&cfg.remote.base_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        _ => {
            return Err(ConfigError::Invalid(
                "remote.base_url must be an absolute http(s) URL",
            ))
        }
    }
    if cfg.remote.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("remote.timeout_seconds must be > 0"));
    }
    if cfg.remote.user_agent.trim().is_empty() {
        return Err(ConfigError::Invalid("remote.user_agent must be non-empty"));
    }

    if cfg.sync.page_size == 0 {
        return Err(ConfigError::Invalid("sync.page_size must be > 0"));
    }
    if !SEARCH_DEBOUNCE_RANGE_MS.contains(&cfg.sync.search_debounce_ms) {
        return Err(ConfigError::Invalid(
            "sync.search_debounce_ms must be between 250 and 300",
        ));
    }

    Ok(())
}

/// Canonical example configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

remote:
  base_url: "https://dev.to/api/articles"
  timeout_seconds: 30
  user_agent: "article-sync/0.1"

sync:
  page_size: 20
  search_debounce_ms: 250
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn example_config() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_config();
        validate(&cfg).unwrap();
        assert_eq!(cfg.sync.page_size, 20);
        assert_eq!(cfg.sync.search_debounce(), Duration::from_millis(250));
    }

    #[test]
    fn invalid_base_url() {
        let mut cfg = example_config();
        cfg.remote.base_url = "dev.to/api".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("remote.base_url")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_config();
        cfg.remote.base_url = "ftp://dev.to/api".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_sync_settings() {
        let mut cfg = example_config();
        cfg.sync.page_size = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("page_size")),
            _ => panic!("wrong error"),
        }

        for ms in [0, 100, 249, 301, 1000] {
            let mut cfg = example_config();
            cfg.sync.search_debounce_ms = ms;
            match validate(&cfg) {
                Err(ConfigError::Invalid(msg)) => assert!(msg.contains("search_debounce_ms")),
                other => panic!("{ms}ms accepted: {other:?}"),
            }
        }
        let mut cfg = example_config();
        cfg.sync.search_debounce_ms = 300;
        assert!(validate(&cfg).is_ok());

        let mut cfg = example_config();
        cfg.remote.timeout_seconds = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_config();
        cfg.app.data_dir = "  ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg = example_config();
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
        assert_eq!(cfg.remote.base_url, "https://dev.to/api/articles");
    }

    #[test]
    fn load_rejects_malformed_yaml() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, "app: [").unwrap();
        assert!(matches!(load(Some(&p)), Err(ConfigError::Parse(_))));
    }
}
