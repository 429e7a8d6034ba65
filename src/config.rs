//! TOML configuration.
//!
//! Only `[db]` is mandatory; every other section falls back to defaults that
//! point the pipeline at the public JSONPlaceholder API and write files under
//! `./data` and `./reports`. A handful of `REST_ETL_*` environment variables
//! override the file after parsing, before validation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Total attempts per request, including the first one.
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
            page_size: None,
            max_pages: default_max_pages(),
        }
    }
}

fn default_base_url() -> String {
    "https://jsonplaceholder.typicode.com".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_retries() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    1000
}
fn default_max_pages() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            reports_dir: default_reports_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_reports_dir() -> PathBuf {
    PathBuf::from("./reports")
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    #[serde(default = "default_top_posts")]
    pub top_posts: i64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            top_posts: default_top_posts(),
        }
    }
}

fn default_top_posts() -> i64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_recent_runs")]
    pub recent_runs: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            recent_runs: default_recent_runs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_recent_runs() -> i64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_flow_retries")]
    pub flow_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            flow_retries: default_flow_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    86_400
}
fn default_flow_retries() -> u32 {
    2
}
fn default_retry_delay_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Config with every section at its default and the database at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            api: ApiConfig::default(),
            storage: StorageConfig::default(),
            analytics: AnalyticsConfig::default(),
            server: ServerConfig::default(),
            schedule: ScheduleConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Applies `REST_ETL_*` environment overrides on top of the parsed file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("REST_ETL_API_BASE_URL") {
            self.api.base_url = url;
        }
        if let Some(path) = lookup("REST_ETL_DB_PATH") {
            self.db.path = PathBuf::from(path);
        }
        if let Some(bind) = lookup("REST_ETL_SERVER_BIND") {
            self.server.bind = bind;
        }
        if let Some(level) = lookup("REST_ETL_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.api.base_url.starts_with("http://") || self.api.base_url.starts_with("https://"))
        {
            anyhow::bail!("api.base_url must start with http:// or https://");
        }
        if self.api.retries == 0 {
            anyhow::bail!("api.retries must be >= 1");
        }
        if self.api.timeout_secs == 0 {
            anyhow::bail!("api.timeout_secs must be > 0");
        }
        if self.api.page_size == Some(0) {
            anyhow::bail!("api.page_size must be > 0 when set");
        }
        if self.api.max_pages == 0 {
            anyhow::bail!("api.max_pages must be > 0");
        }
        if self.analytics.top_posts < 1 {
            anyhow::bail!("analytics.top_posts must be >= 1");
        }
        if self.server.recent_runs < 1 {
            anyhow::bail!("server.recent_runs must be >= 1");
        }
        if self.schedule.interval_secs == 0 {
            anyhow::bail!("schedule.interval_secs must be > 0");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.apply_env_overrides();
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = toml::from_str("[db]\npath = \"/tmp/etl.sqlite\"\n").unwrap();
        assert_eq!(config.api.base_url, "https://jsonplaceholder.typicode.com");
        assert_eq!(config.api.retries, 3);
        assert_eq!(config.analytics.top_posts, 10);
        assert_eq!(config.storage.data_dir, PathBuf::from("./data"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_retries() {
        let config: Config =
            toml::from_str("[db]\npath = \"x.sqlite\"\n[api]\nretries = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("api.retries"));
    }

    #[test]
    fn rejects_base_url_without_scheme() {
        let config: Config =
            toml::from_str("[db]\npath = \"x.sqlite\"\n[api]\nbase_url = \"example.com\"\n")
                .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = Config::with_db_path("a.sqlite");
        config.apply_overrides(|key| match key {
            "REST_ETL_DB_PATH" => Some("b.sqlite".to_string()),
            "REST_ETL_SERVER_BIND" => Some("0.0.0.0:9000".to_string()),
            _ => None,
        });
        assert_eq!(config.db.path, PathBuf::from("b.sqlite"));
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.logging.level, "info");
    }
}
