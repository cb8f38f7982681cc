//! Configuration management for Newsflow.
//!
//! Configuration is read from `~/.config/newsflow/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestrator::{DEFAULT_CONCURRENCY, MAX_CONCURRENCY};

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub refresh: RefreshConfig,
    pub http: HttpConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Feeds refreshed at once by a batch (1-10).
    pub concurrency: usize,
    /// Scheduler workers; defaults to `concurrency`.
    pub workers: Option<usize>,
    /// Daemon refresh interval, e.g. "30m", "1h", "1d".
    pub interval: String,
    /// Whether the daemon refreshes immediately on start.
    pub on_startup: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            workers: None,
            interval: "1h".to_string(),
            on_startup: true,
        }
    }
}

impl RefreshConfig {
    pub fn workers(&self) -> usize {
        self.workers.unwrap_or(self.concurrency)
    }

    pub fn interval(&self) -> Result<Duration, ConfigError> {
        parse_interval(&self.interval)
            .map(Duration::from_secs)
            .map_err(ConfigError::Invalid)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Self-hosted GitLab hosts that receive `GITLAB_FEED_TOKEN`.
    pub gitlab_hosts: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            gitlab_hosts: Vec::new(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path. Defaults to the platform data directory.
    pub database: Option<PathBuf>,
}

impl StorageConfig {
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => {
                let data_dir = dirs::data_dir().ok_or(ConfigError::NoConfigDir)?;
                Ok(data_dir.join("newsflow").join("newsflow.db"))
            }
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, which must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path: `~/.config/newsflow/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("newsflow").join("config.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_CONCURRENCY).contains(&self.refresh.concurrency) {
            return Err(ConfigError::Invalid(format!(
                "refresh.concurrency must be between 1 and {}, got {}",
                MAX_CONCURRENCY, self.refresh.concurrency
            )));
        }
        if self.refresh.workers() == 0 {
            return Err(ConfigError::Invalid(
                "refresh.workers must be at least 1".to_string(),
            ));
        }
        if self.http.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "http.timeout_secs must be at least 1".to_string(),
            ));
        }
        self.refresh.interval()?;
        Ok(())
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    fn default_config_content() -> String {
        r##"# Newsflow Configuration

[refresh]
# Feeds refreshed at the same time during a batch (1-10)
concurrency = 4

# Background workers executing refresh tasks (defaults to concurrency)
# workers = 4

# How often the daemon refreshes all feeds: "30m", "1h", "6h", "1d"
interval = "1h"

# Refresh immediately when the daemon starts
on_startup = true

[http]
# Per-request timeout in seconds
timeout_secs = 30

# GITHUB_FEED_TOKEN / GITLAB_FEED_TOKEN are sent as ?feed_token= to github.com,
# gitlab.com and these self-hosted GitLab hosts
# gitlab_hosts = ["gitlab.example.org"]

[storage]
# SQLite database location (defaults to the platform data directory)
# database = "/path/to/newsflow.db"
"##
        .to_string()
    }
}

/// Longest accepted refresh interval.
pub const MAX_INTERVAL_SECS: u64 = 365 * 86400;

/// Parse interval string like "1h", "30m", "6h", "1d" into seconds.
pub fn parse_interval(s: &str) -> Result<u64, String> {
    let s = s.trim().to_lowercase();

    let (count, unit, label) = if let Some(hours) = s.strip_suffix('h') {
        (hours, 3600, "hours")
    } else if let Some(minutes) = s.strip_suffix('m') {
        (minutes, 60, "minutes")
    } else if let Some(days) = s.strip_suffix('d') {
        (days, 86400, "days")
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1, "seconds")
    } else {
        let secs = s
            .parse::<u64>()
            .map_err(|_| format!("Invalid interval: {}. Use format like '1h', '30m', '1d'", s))?;
        return check_interval(secs);
    };

    let secs = count
        .parse::<u64>()
        .map_err(|_| format!("Invalid {}: {}", label, count))?
        .checked_mul(unit)
        .ok_or_else(|| format!("Interval too large: {}", s))?;
    check_interval(secs)
}

fn check_interval(secs: u64) -> Result<u64, String> {
    if secs == 0 {
        return Err("Interval must be greater than zero".to_string());
    }
    if secs > MAX_INTERVAL_SECS {
        return Err(format!(
            "Interval must be at most {}",
            format_interval(MAX_INTERVAL_SECS)
        ));
    }
    Ok(secs)
}

/// Format interval for display
pub fn format_interval(secs: u64) -> String {
    if secs >= 86400 && secs.is_multiple_of(86400) {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 && secs.is_multiple_of(3600) {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs.is_multiple_of(60) {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
