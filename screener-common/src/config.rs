//! Configuration management for the market screener.
//!
//! The screener reads a single configuration file at `~/.screener/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (SCREENER_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `SCREENER_INTERVAL_SECS` → scanner.interval_secs
//! - `SCREENER_SOURCE_URL` → scanner.source_url (also switches source to `http`)
//! - `SCREENER_LOG_LEVEL` → observability.log_level
//! - `SCREENER_LOG_FORMAT` → observability.log_format
//!
//! # Example
//!
//! ```json
//! {
//!   "scanner": {
//!     "interval_secs": 900,
//!     "history_capacity": 100,
//!     "source": "http",
//!     "source_url": "http://127.0.0.1:8080/instruments"
//!   },
//!   "observability": { "log_level": "debug", "log_format": "json" }
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".screener"),
        |dirs| dirs.home_dir().join(".screener"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration for the screener service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Background scanner settings
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Logging settings
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides, then validate it.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secs) = lookup("SCREENER_INTERVAL_SECS") {
            match secs.parse() {
                Ok(s) => self.scanner.interval_secs = s,
                Err(_) => tracing::warn!(value = %secs, "Ignoring invalid SCREENER_INTERVAL_SECS"),
            }
        }

        if let Some(url) = lookup("SCREENER_SOURCE_URL") {
            self.scanner.source_url = Some(url);
            self.scanner.source = SourceKind::Http;
        }

        if let Some(level) = lookup("SCREENER_LOG_LEVEL") {
            self.observability.log_level = level;
        }

        if let Some(format) = lookup("SCREENER_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> crate::Result<()> {
        let scanner = &self.scanner;

        if scanner.interval_secs == 0 {
            return Err(Error::Config("scanner.interval_secs must be positive".into()));
        }
        if scanner.history_capacity == 0 {
            return Err(Error::Config("scanner.history_capacity must be positive".into()));
        }
        if scanner.source == SourceKind::Http && scanner.source_url.is_none() {
            return Err(Error::Config(
                "scanner.source_url is required when scanner.source is \"http\"".into(),
            ));
        }
        if scanner.mid_cap_min > scanner.large_cap_min {
            return Err(Error::Config(format!(
                "scanner.mid_cap_min ({}) exceeds scanner.large_cap_min ({})",
                scanner.mid_cap_min, scanner.large_cap_min
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Scanner Configuration
// ============================================================================

/// Where scan data comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Simulated instrument universe
    #[default]
    Sample,
    /// JSON record list served over HTTP
    Http,
}

/// Background scanner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Seconds between the end of one scan attempt and the start of the next
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Number of snapshots retained in history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// How long shutdown waits for the scan loop to exit
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    /// Data source selection
    #[serde(default)]
    pub source: SourceKind,

    /// Endpoint returning a JSON array of records (required for `http`)
    #[serde(default)]
    pub source_url: Option<String>,

    /// HTTP request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Minimum market cap for the large-cap tier
    #[serde(default = "default_large_cap_min")]
    pub large_cap_min: f64,

    /// Minimum market cap for the mid-cap tier
    #[serde(default = "default_mid_cap_min")]
    pub mid_cap_min: f64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            history_capacity: default_history_capacity(),
            stop_timeout_secs: default_stop_timeout_secs(),
            source: SourceKind::default(),
            source_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            large_cap_min: default_large_cap_min(),
            mid_cap_min: default_mid_cap_min(),
        }
    }
}

impl ScannerConfig {
    /// Scan cadence as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Shutdown wait as a `Duration`.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// HTTP request timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_interval_secs() -> u64 {
    900 // 15 minutes
}

fn default_history_capacity() -> usize {
    100
}

fn default_stop_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_large_cap_min() -> f64 {
    20_000.0
}

fn default_mid_cap_min() -> f64 {
    5_000.0
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Additional module targets to clamp to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}
