//! Configuration types for the fleet core
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main fleet configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Offline detection settings
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Firmware update settings
    #[serde(default)]
    pub ota: OtaConfig,

    /// Network policy notification settings
    #[serde(default)]
    pub policy: PolicyConfig,

    /// State store configuration
    #[serde(default)]
    pub state_store: StateStoreConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl FleetConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.watchdog.validate()?;
        self.ota.validate()?;
        self.policy.validate()?;
        self.state_store.validate()?;
        self.engine.validate()?;
        Ok(())
    }
}

/// Offline watchdog and scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Silence after which an online device is demoted (in seconds)
    #[serde(default = "default_offline_threshold_secs")]
    pub offline_threshold_secs: u64,

    /// Period of the sweep timer (in seconds)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl WatchdogConfig {
    /// Validate the watchdog configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.offline_threshold_secs == 0 {
            return Err(crate::Error::config("Offline threshold must be > 0"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(crate::Error::config("Sweep interval must be > 0"));
        }
        Ok(())
    }

    /// Offline threshold as a chrono duration
    pub fn offline_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.offline_threshold_secs).unwrap_or(i64::MAX))
    }

    /// Sweep period as a std duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            offline_threshold_secs: default_offline_threshold_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Firmware update configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtaConfig {
    /// Upper bound for any single artifact store call (in seconds)
    #[serde(default = "default_artifact_timeout_secs")]
    pub artifact_timeout_secs: u64,

    /// How long the production version and block list are cached (in seconds)
    ///
    /// Set to 0 to disable caching.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Refuse to roll devices onto versions listed as blocked
    #[serde(default = "default_true")]
    pub enforce_blocked_versions: bool,
}

impl OtaConfig {
    /// Validate the OTA configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.artifact_timeout_secs == 0 {
            return Err(crate::Error::config("Artifact store timeout must be > 0"));
        }
        Ok(())
    }

    /// Artifact call timeout
    pub fn artifact_timeout(&self) -> Duration {
        Duration::from_secs(self.artifact_timeout_secs)
    }

    /// Cache lifetime
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            artifact_timeout_secs: default_artifact_timeout_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            enforce_blocked_versions: default_true(),
        }
    }
}

/// Network policy notifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Upper bound for a single policy service call (in seconds)
    #[serde(default = "default_policy_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per command before it is abandoned
    #[serde(default = "default_policy_max_attempts")]
    pub max_attempts: usize,

    /// Delay between attempts (in seconds)
    #[serde(default = "default_policy_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Capacity of the pending command queue
    ///
    /// When full, new commands are dropped (with a warning log).
    #[serde(default = "default_policy_queue_capacity")]
    pub queue_capacity: usize,
}

impl PolicyConfig {
    /// Validate the policy configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("Policy timeout must be > 0"));
        }
        if self.max_attempts == 0 {
            return Err(crate::Error::config("Policy max_attempts must be >= 1"));
        }
        if self.queue_capacity == 0 {
            return Err(crate::Error::config("Policy queue capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_policy_timeout_secs(),
            max_attempts: default_policy_max_attempts(),
            retry_delay_secs: default_policy_retry_delay_secs(),
            queue_capacity: default_policy_queue_capacity(),
        }
    }
}

/// State store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// File-based state store
    File {
        /// Path to the state file
        path: String,
    },

    /// In-memory state store (not persistent)
    #[default]
    Memory,
}

impl StateStoreConfig {
    /// Validate the state store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StateStoreConfig::File { path } if path.is_empty() => {
                Err(crate::Error::config("File state store path cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retries of a device read-modify-write after a storage conflict
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: usize,

    /// Capacity of the internal event channel
    ///
    /// When full, new events will be dropped (with a warning log).
    /// This prevents unbounded memory growth under telemetry storms.
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Firmware version assumed for newly registered devices
    #[serde(default = "default_firmware_version")]
    pub default_firmware_version: String,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        crate::version::Version::parse(&self.default_firmware_version)?;
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: default_max_conflict_retries(),
            event_channel_capacity: default_event_channel_capacity(),
            default_firmware_version: default_firmware_version(),
        }
    }
}

fn default_offline_threshold_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_artifact_timeout_secs() -> u64 {
    10
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_policy_timeout_secs() -> u64 {
    10
}

fn default_policy_max_attempts() -> usize {
    3
}

fn default_policy_retry_delay_secs() -> u64 {
    2
}

fn default_policy_queue_capacity() -> usize {
    256
}

fn default_max_conflict_retries() -> usize {
    3
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_firmware_version() -> String {
    "1.0.0".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = FleetConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.watchdog.offline_threshold_secs, 60);
        assert_eq!(config.ota.cache_ttl_secs, 60);
    }

    #[test]
    fn missing_sections_take_defaults() {
        let config: FleetConfig =
            serde_json::from_str(r#"{"watchdog": {"offline_threshold_secs": 30}}"#).unwrap();
        assert_eq!(config.watchdog.offline_threshold_secs, 30);
        assert_eq!(config.watchdog.sweep_interval_secs, 60);
        assert!(matches!(config.state_store, StateStoreConfig::Memory));
    }

    #[test]
    fn rejects_bad_default_firmware() {
        let mut config = FleetConfig::new();
        config.engine.default_firmware_version = "1.0".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_file_path() {
        let mut config = FleetConfig::new();
        config.state_store = StateStoreConfig::File {
            path: String::new(),
        };
        assert!(config.validate().is_err());
    }
}
