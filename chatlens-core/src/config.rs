//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/chatlens/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/chatlens/` (~/.config/chatlens/)
//! - Data: `$XDG_DATA_HOME/chatlens/` (~/.local/share/chatlens/)
//! - State/Logs: `$XDG_STATE_HOME/chatlens/` (~/.local/state/chatlens/)

use crate::error::{Error, Result};
use crate::metrics::{DEFAULT_FALLBACK_WINDOW_DAYS, DEFAULT_TODAY_MIN_SAMPLE};
use crate::types::{FilterState, LatencyMode};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable consulted when `source.api_key` is not set.
pub const API_KEY_ENV: &str = "CHATLENS_API_KEY";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Remote chat events table
    #[serde(default)]
    pub source: SourceConfig,

    /// Local snapshot cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Metric thresholds
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Initial filter selection
    #[serde(default)]
    pub filters: FiltersConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote REST source configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Base URL of the REST backend (e.g., `https://xyz.supabase.co`)
    pub url: Option<String>,

    /// API key (can also use `CHATLENS_API_KEY`)
    pub api_key: Option<String>,

    /// Table holding one row per exchange
    #[serde(default = "default_table")]
    pub table: String,

    /// Table holding chatbot liveness records
    #[serde(default = "default_status_table")]
    pub status_table: String,

    /// Bot id looked up in the status table
    #[serde(default = "default_bot_id")]
    pub bot_id: String,

    /// Maximum rows per fetch
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            table: default_table(),
            status_table: default_status_table(),
            bot_id: default_bot_id(),
            limit: default_limit(),
            timeout_secs: default_timeout(),
        }
    }
}

impl SourceConfig {
    /// API key from the config file, else from the environment.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty()))
    }

    /// Check if the source has everything it needs to connect
    pub fn is_ready(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.trim().is_empty())
            && self.resolved_api_key().is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "source.url must start with http:// or https:// (got {:?})",
                    url
                )));
            }
        }
        if self.table.trim().is_empty() {
            return Err(Error::Config("source.table must not be empty".to_string()));
        }
        if self.limit == 0 {
            return Err(Error::Config(
                "source.limit must be greater than 0".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "source.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_table() -> String {
    "chat_events".to_string()
}

fn default_status_table() -> String {
    "chatbot_status".to_string()
}

fn default_bot_id() -> String {
    "chatbot".to_string()
}

fn default_limit() -> usize {
    5000
}

fn default_timeout() -> u64 {
    12
}

/// Snapshot cache configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Write snapshots after successful fetches and read them on failure
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Partition key, e.g. one per environment; empty when unset
    pub scope: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scope: None,
        }
    }
}

impl CacheConfig {
    /// Scope key used in the snapshots table
    pub fn scope_key(&self) -> &str {
        self.scope.as_deref().map(str::trim).unwrap_or("")
    }
}

fn default_true() -> bool {
    true
}

/// Metrics thresholds
#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    /// Initial latency aggregation (`p95` or `avg`)
    #[serde(default)]
    pub latency_mode: LatencyMode,

    /// Minimum turns today before the success ring stops falling back
    #[serde(default = "default_today_min_sample")]
    pub today_min_sample: usize,

    /// Trailing window used by the fallback
    #[serde(default = "default_fallback_window_days")]
    pub fallback_window_days: u32,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            latency_mode: LatencyMode::default(),
            today_min_sample: default_today_min_sample(),
            fallback_window_days: default_fallback_window_days(),
        }
    }
}

fn default_today_min_sample() -> usize {
    DEFAULT_TODAY_MIN_SAMPLE
}

fn default_fallback_window_days() -> u32 {
    DEFAULT_FALLBACK_WINDOW_DAYS
}

/// Initial filter selection
#[derive(Debug, Deserialize, Clone)]
pub struct FiltersConfig {
    /// Range selector: `7d`, `30d`, `24h`, `all`, ...
    #[serde(default = "default_range")]
    pub range: String,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            range: default_range(),
        }
    }
}

impl FiltersConfig {
    /// Initial [`FilterState`] built from this section
    pub fn initial_state(&self) -> FilterState {
        FilterState {
            range_days: FilterState::parse_range(&self.range),
            ..FilterState::default()
        }
    }
}

fn default_range() -> String {
    "30d".to_string()
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.source.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/chatlens/config.toml` (~/.config/chatlens/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("chatlens").join("config.toml")
    }

    /// Returns the data directory path (for the snapshot cache)
    ///
    /// `$XDG_DATA_HOME/chatlens/` (~/.local/share/chatlens/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("chatlens")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/chatlens/` (~/.local/state/chatlens/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("chatlens")
    }

    /// Returns the cache database path
    ///
    /// `$XDG_DATA_HOME/chatlens/cache.db` (~/.local/share/chatlens/cache.db)
    pub fn cache_path() -> PathBuf {
        Self::data_dir().join("cache.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/chatlens/chatlens.log` (~/.local/state/chatlens/chatlens.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("chatlens.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
