//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::index::manager::{LoadingMode, ManagerConfig};
use crate::index::partition::TableRanges;
use crate::index::scheduler::ScheduleConfig;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub manager: ManagerSection,

    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default = "default_periods")]
    pub periods: Vec<PeriodConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Manager configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerSection {
    #[serde(default = "default_node_name")]
    pub node_name: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Skip unreadable index files at startup instead of registering them
    #[serde(default)]
    pub strict_loading: bool,
}

fn default_node_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string())
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("tsdb-manager").to_string_lossy().to_string())
        .unwrap_or_else(|| "./tsdb_data".to_string())
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            data_dir: default_data_dir(),
            strict_loading: false,
        }
    }
}

/// Build scheduler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_build_interval")]
    pub build_interval_secs: u64,

    #[serde(default = "default_min_wal_age")]
    pub min_wal_age_secs: u64,

    #[serde(default = "default_build_timeout")]
    pub build_timeout_secs: u64,
}

fn default_build_interval() -> u64 {
    60
}

fn default_min_wal_age() -> u64 {
    15 * 60
}

fn default_build_timeout() -> u64 {
    10 * 60
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            build_interval_secs: default_build_interval(),
            min_wal_age_secs: default_min_wal_age(),
            build_timeout_secs: default_build_timeout(),
        }
    }
}

/// One schema period: tables from `from` onwards use `prefix`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PeriodConfig {
    pub from: NaiveDate,
    pub prefix: String,
}

fn default_periods() -> Vec<PeriodConfig> {
    vec![PeriodConfig {
        from: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
        prefix: "index_".to_string(),
    }]
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    /// Parse TOML config text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })?;
        config.table_ranges()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tsdb-manager").join("config.toml")),
            Some(PathBuf::from("/etc/tsdb-manager/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `TSDB_*` overrides from `lookup`
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(data_dir) = lookup("TSDB_DATA_DIR") {
            self.manager.data_dir = data_dir;
        }
        if let Some(node_name) = lookup("TSDB_NODE_NAME") {
            self.manager.node_name = node_name;
        }
        if let Some(strict) = lookup("TSDB_STRICT_LOADING") {
            self.manager.strict_loading = matches!(strict.as_str(), "1" | "true" | "yes");
        }

        if let Some(level) = lookup("TSDB_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("TSDB_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Table ranges derived from `[[periods]]`
    pub fn table_ranges(&self) -> Result<TableRanges, ConfigError> {
        let periods: Vec<(NaiveDate, String)> = self
            .periods
            .iter()
            .map(|p| (p.from, p.prefix.clone()))
            .collect();
        TableRanges::from_periods(&periods).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.manager.data_dir)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        let mut config = ManagerConfig::new(self.manager.node_name.clone(), self.data_dir());
        config.loading = if self.manager.strict_loading {
            LoadingMode::Strict
        } else {
            LoadingMode::Lenient
        };
        config
    }

    pub fn schedule_config(&self) -> ScheduleConfig {
        ScheduleConfig {
            build_interval: Duration::from_secs(self.scheduler.build_interval_secs.max(1)),
            min_wal_age: Duration::from_secs(self.scheduler.min_wal_age_secs),
            build_timeout: Duration::from_secs(self.scheduler.build_timeout_secs.max(1)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            manager: ManagerSection::default(),
            scheduler: SchedulerSection::default(),
            periods: default_periods(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# TSDB Manager Configuration
#
# Environment variables override these settings:
# - TSDB_DATA_DIR
# - TSDB_NODE_NAME
# - TSDB_STRICT_LOADING
# - TSDB_LOG_LEVEL
# - TSDB_LOG_FORMAT

[manager]
# Name of this node, embedded in built index file names
node_name = "ingester-0"

# Root holding multitenant/, scratch/ and wal/
data_dir = "~/.local/share/tsdb-manager"

# Skip index files with unreadable headers at startup
strict_loading = false

[scheduler]
# Seconds between build passes
build_interval_secs = 60

# WAL segments younger than this are left for a later pass
min_wal_age_secs = 900

# A build pass running longer than this is treated as failed
build_timeout_secs = 600

# Schema periods, in increasing order of start date.
# Each period covers daily tables from its start date up to the next period.
[[periods]]
from = "2020-01-01"
prefix = "index_"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
