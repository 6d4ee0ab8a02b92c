//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/fraudsim/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/fraudsim/` (~/.config/fraudsim/)
//! - Data: `$XDG_DATA_HOME/fraudsim/` (~/.local/share/fraudsim/)
//! - State/Logs: `$XDG_STATE_HOME/fraudsim/` (~/.local/state/fraudsim/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

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
    /// Session tracking windows and capture queue
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Operator dashboard refresh settings
    #[serde(default)]
    pub dashboard: DashboardConfig,

    /// Periodic liveness sweep
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Session tracking configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TrackingConfig {
    /// Seconds without activity before an active session counts as gone
    #[serde(default = "default_liveness_window")]
    pub liveness_window_secs: u64,

    /// Seconds within which a session is flagged "recently active"
    #[serde(default = "default_recent_window")]
    pub recent_window_secs: u64,

    /// Capacity of the capture work queue
    #[serde(default = "default_capture_queue_size")]
    pub capture_queue_size: usize,

    /// Seconds between retries of captures kept in the fallback cache
    #[serde(default = "default_replay_interval")]
    pub replay_interval_secs: u64,

    /// Number of steps in the simulated checkout flow
    #[serde(default = "default_total_steps")]
    pub total_steps: u32,

    /// Email addresses that always classify as operator sessions
    #[serde(default)]
    pub operator_emails: Vec<String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            liveness_window_secs: default_liveness_window(),
            recent_window_secs: default_recent_window(),
            capture_queue_size: default_capture_queue_size(),
            replay_interval_secs: default_replay_interval(),
            total_steps: default_total_steps(),
            operator_emails: vec![],
        }
    }
}

impl TrackingConfig {
    pub fn liveness_window(&self) -> chrono::Duration {
        window(self.liveness_window_secs)
    }

    pub fn recent_window(&self) -> chrono::Duration {
        window(self.recent_window_secs)
    }

    pub fn replay_interval(&self) -> Duration {
        Duration::from_secs(self.replay_interval_secs)
    }
}

/// Upper bound for any tracking window (one year).
const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// Clamped to [`MAX_WINDOW_SECS`] so unvalidated values cannot overflow.
fn window(secs: u64) -> chrono::Duration {
    let secs = i64::try_from(secs.min(MAX_WINDOW_SECS)).unwrap_or(i64::MAX);
    chrono::Duration::seconds(secs)
}

fn default_liveness_window() -> u64 {
    180
}

fn default_recent_window() -> u64 {
    60
}

fn default_capture_queue_size() -> usize {
    256
}

fn default_replay_interval() -> u64 {
    15
}

fn default_total_steps() -> u32 {
    6
}

/// Dashboard configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    /// Fixed poll interval in seconds (push notifications also trigger reloads)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum sessions shown per reload
    #[serde(default = "default_session_limit")]
    pub session_limit: usize,

    /// Maximum activity records shown per reload
    #[serde(default = "default_activity_limit")]
    pub activity_limit: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            session_limit: default_session_limit(),
            activity_limit: default_activity_limit(),
        }
    }
}

impl DashboardConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn default_poll_interval() -> u64 {
    10
}

fn default_session_limit() -> usize {
    50
}

fn default_activity_limit() -> usize {
    20
}

/// Cleanup scheduler configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CleanupConfig {
    /// Run the periodic liveness sweep
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: default_cleanup_enabled(),
            interval_secs: default_cleanup_interval(),
        }
    }
}

impl CleanupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_cleanup_enabled() -> bool {
    true
}

fn default_cleanup_interval() -> u64 {
    60
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

    /// Also print warnings and errors to stderr
    #[serde(default)]
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
            console: false,
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

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let tracking = &self.tracking;
        if tracking.liveness_window_secs == 0 {
            return Err(Error::Config(
                "tracking.liveness_window_secs must be greater than 0".to_string(),
            ));
        }
        if tracking.liveness_window_secs > MAX_WINDOW_SECS {
            return Err(Error::Config(format!(
                "tracking.liveness_window_secs cannot exceed {MAX_WINDOW_SECS}"
            )));
        }
        if tracking.recent_window_secs > tracking.liveness_window_secs {
            return Err(Error::Config(
                "tracking.recent_window_secs cannot exceed tracking.liveness_window_secs"
                    .to_string(),
            ));
        }
        if tracking.capture_queue_size == 0 {
            return Err(Error::Config(
                "tracking.capture_queue_size must be greater than 0".to_string(),
            ));
        }
        if tracking.replay_interval_secs == 0 {
            return Err(Error::Config(
                "tracking.replay_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.dashboard.poll_interval_secs == 0 {
            return Err(Error::Config(
                "dashboard.poll_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.cleanup.enabled && self.cleanup.interval_secs == 0 {
            return Err(Error::Config(
                "cleanup.interval_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/fraudsim/config.toml` (~/.config/fraudsim/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("fraudsim").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database and fallback cache)
    ///
    /// `$XDG_DATA_HOME/fraudsim/` (~/.local/share/fraudsim/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("fraudsim")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/fraudsim/` (~/.local/state/fraudsim/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("fraudsim")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/fraudsim/data.db` (~/.local/share/fraudsim/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Returns the fallback cache file path
    ///
    /// `$XDG_DATA_HOME/fraudsim/fallback.json`
    pub fn fallback_cache_path() -> PathBuf {
        Self::data_dir().join("fallback.json")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/fraudsim/fraudsim.log` (~/.local/state/fraudsim/fraudsim.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("fraudsim.log")
    }
}
