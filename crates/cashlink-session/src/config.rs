//! # Session Configuration
//!
//! Configuration for device sessions: currency, connect bound, polling
//! cadences, settle delay and journal sizes.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     CASHLINK_CURRENCY=EUR                                              │
//! │     CASHLINK_STATUS_INTERVAL_MS=500                                    │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/session/session.toml (Linux)                             │
//! │     ~/Library/Application Support/com.cashlink.session/session.toml    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # session.toml
//! [device]
//! currency = "EUR"
//! connect_timeout_secs = 10
//!
//! [polling]
//! status_interval_ms = 500
//! snapshot_interval_ms = 2000
//! settle_delay_ms = 1000
//!
//! [journal]
//! activity_capacity = 200
//! recent_change_capacity = 10
//! ```

use cashlink_core::validation::validate_currency;
use cashlink_core::{DEFAULT_ACTIVITY_LOG_CAPACITY, DEFAULT_RECENT_CHANGE_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};

// =============================================================================
// Device Settings
// =============================================================================

/// Settings shared by both units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// The single configured currency (ISO 4217 code).
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Upper bound on one connect call (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Currency used when none is configured.
pub const DEFAULT_CURRENCY: &str = "EUR";

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            currency: default_currency(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

// =============================================================================
// Polling Settings
// =============================================================================

/// Cadences of the two polling cycles and the post-write settle delay.
///
/// ```text
/// status   ──●────●────●────●────●────●────●────●──   every 500 ms
/// snapshot ──●───────────────────●───────────────────   every 2000 ms
/// write         ├─ command ─┤── settle 1000 ms ──┤ resume
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSettings {
    #[serde(default = "default_status_interval")]
    pub status_interval_ms: u64,

    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_ms: u64,

    /// Wait after a write before observation resumes.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
}

fn default_status_interval() -> u64 {
    500
}

fn default_snapshot_interval() -> u64 {
    2000
}

fn default_settle_delay() -> u64 {
    1000
}

impl Default for PollingSettings {
    fn default() -> Self {
        PollingSettings {
            status_interval_ms: default_status_interval(),
            snapshot_interval_ms: default_snapshot_interval(),
            settle_delay_ms: default_settle_delay(),
        }
    }
}

// =============================================================================
// Journal Settings
// =============================================================================

/// Sizes of the in-memory rolling logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalSettings {
    #[serde(default = "default_activity_capacity")]
    pub activity_capacity: usize,

    /// Recent stock changes kept per unit.
    #[serde(default = "default_recent_change_capacity")]
    pub recent_change_capacity: usize,
}

fn default_activity_capacity() -> usize {
    DEFAULT_ACTIVITY_LOG_CAPACITY
}

fn default_recent_change_capacity() -> usize {
    DEFAULT_RECENT_CHANGE_CAPACITY
}

impl Default for JournalSettings {
    fn default() -> Self {
        JournalSettings {
            activity_capacity: default_activity_capacity(),
            recent_change_capacity: default_recent_change_capacity(),
        }
    }
}

// =============================================================================
// Main Session Configuration
// =============================================================================

/// Complete session configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub device: DeviceSettings,

    #[serde(default)]
    pub polling: PollingSettings,

    #[serde(default)]
    pub journal: JournalSettings,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (session.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SessionResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading session config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load session config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SessionResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SessionError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SessionError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SessionError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Session config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SessionResult<()> {
        validate_currency(&self.device.currency)?;

        if self.device.connect_timeout_secs == 0 {
            return Err(SessionError::InvalidConfig(
                "connect_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.polling.status_interval_ms == 0 || self.polling.snapshot_interval_ms == 0 {
            return Err(SessionError::InvalidConfig(
                "polling intervals must be greater than 0".into(),
            ));
        }

        if self.journal.activity_capacity == 0 || self.journal.recent_change_capacity == 0 {
            return Err(SessionError::InvalidConfig(
                "journal capacities must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(currency) = std::env::var("CASHLINK_CURRENCY") {
            debug!(currency = %currency, "Overriding currency from environment");
            self.device.currency = currency.to_uppercase();
        }

        if let Some(secs) = env_number("CASHLINK_CONNECT_TIMEOUT_SECS") {
            self.device.connect_timeout_secs = secs;
        }

        if let Some(ms) = env_number("CASHLINK_STATUS_INTERVAL_MS") {
            debug!(ms, "Overriding status interval from environment");
            self.polling.status_interval_ms = ms;
        }

        if let Some(ms) = env_number("CASHLINK_SNAPSHOT_INTERVAL_MS") {
            debug!(ms, "Overriding snapshot interval from environment");
            self.polling.snapshot_interval_ms = ms;
        }

        if let Some(ms) = env_number("CASHLINK_SETTLE_DELAY_MS") {
            self.polling.settle_delay_ms = ms;
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "cashlink", "session")
            .map(|dirs| dirs.config_dir().join("session.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn currency(&self) -> &str {
        &self.device.currency
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.device.connect_timeout_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.polling.status_interval_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.polling.snapshot_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.polling.settle_delay_ms)
    }
}

fn env_number(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring non-numeric environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.currency(), "EUR");
        assert_eq!(config.status_interval(), Duration::from_millis(500));
        assert_eq!(config.snapshot_interval(), Duration::from_millis(2000));
        assert_eq!(config.settle_delay(), Duration::from_secs(1));
        assert_eq!(config.journal.activity_capacity, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SessionConfig::default();

        config.device.currency = "euro".to_string();
        assert!(config.validate().is_err());

        config.device.currency = "USD".to_string();
        config.polling.status_interval_ms = 0;
        assert!(config.validate().unwrap_err().is_config_error());

        config.polling.status_interval_ms = 250;
        config.journal.recent_change_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: SessionConfig = toml::from_str(
            r#"
            [polling]
            status_interval_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.polling.status_interval_ms, 250);
        assert_eq!(config.polling.snapshot_interval_ms, 2000);
        assert_eq!(config.device.connect_timeout_secs, 10);
    }

    #[test]
    fn test_toml_serialization() {
        let config = SessionConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[device]"));
        assert!(toml_str.contains("[polling]"));
        assert!(toml_str.contains("[journal]"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "cashlink-session-{}.toml",
            uuid::Uuid::new_v4().simple()
        ));
        let mut config = SessionConfig::default();
        config.polling.settle_delay_ms = 300;
        config.save(Some(path.clone())).unwrap();

        let loaded = SessionConfig::load(Some(path.clone())).unwrap();
        assert_eq!(loaded.polling.settle_delay_ms, 300);
        let _ = std::fs::remove_file(path);
    }
}
