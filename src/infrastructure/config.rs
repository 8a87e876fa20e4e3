//! Application configuration
//!
//! JSON config file loaded from (and initially written to) the platform
//! config directory. Every knob the sync engine exposes lives here: the
//! registry endpoint and paging parameters, the concurrency/pacing limits,
//! the database location and the logging setup.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub registry: RegistryConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Upstream registry endpoint and paging behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub base_url: String,
    pub user_agent: String,
    /// Records per bulk page.
    pub page_size: u32,
    /// Concurrent in-flight page fetches.
    pub max_concurrent_fetches: usize,
    /// A pacing delay is inserted after this many dispatched fetches.
    pub pace_every: u32,
    pub pace_delay_ms: u64,
    /// Bulk page request timeout.
    pub fetch_timeout_seconds: u64,
    /// Timeout for the metadata probe (page-size 1).
    pub probe_timeout_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.infosubvenciones.es/bdnstrans/GE/es/api".to_string(),
            user_agent: format!("bdns-sync/{}", env!("CARGO_PKG_VERSION")),
            page_size: 200,
            max_concurrent_fetches: 3,
            pace_every: 10,
            pace_delay_ms: 1000,
            fetch_timeout_seconds: 60,
            probe_timeout_seconds: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx SQLite URL; the parent directory is created on connect.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:./data/bdns.db".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// "error", "warn", "info", "debug" or "trace".
    pub level: String,
    /// Also write a rolling log file next to the console output.
    pub file_output: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_output: false,
            log_dir: None,
        }
    }
}

/// Loads and persists the JSON config file.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .context("could not determine platform config directory")?
            .join("bdns-sync");
        Ok(Self {
            config_path: config_dir.join("config.json"),
        })
    }

    pub fn with_path(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the config file, writing the defaults first if it is missing.
    pub async fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            let defaults = AppConfig::default();
            self.save_config(&defaults).await?;
            info!(path = %self.config_path.display(), "wrote default configuration");
            return Ok(defaults);
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .with_context(|| format!("failed to read {}", self.config_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("invalid config file {}", self.config_path.display()))
    }

    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.config_path, content)
            .await
            .with_context(|| format!("failed to write {}", self.config_path.display()))
    }
}
