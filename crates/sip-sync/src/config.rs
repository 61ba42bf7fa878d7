//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                            │
//! │     SIP_DEVICE_IDENTITY="Apple Watch"                                   │
//! │     SIP_SUBSCRIPTIONS_ENABLED=false                                     │
//! │                                                                         │
//! │  2. TOML Config File                                                    │
//! │     ~/.config/sip/sync.toml (Linux)                                     │
//! │     ~/Library/Application Support/com.sip.sync/sync.toml (macOS)        │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                    │
//! │     record type "SipEvent", zone suffix " Zone", 200-row pages          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [device]
//! identity = "Apple Watch"   # usually left unset; the application supplies it
//! name = "Wrist"
//!
//! [remote]
//! record_type = "SipEvent"
//! subscription_id = "newSipEvent"
//! zone_suffix = " Zone"
//! subscriptions_enabled = true
//!
//! [pull]
//! database_page_size = 200
//! zone_page_size = 200
//!
//! [cache]
//! database_path = "/var/lib/sip/sip.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use sip_core::validation::{validate_device_identity, validate_record_type};
use sip_core::{DeviceIdentity, DEFAULT_RECORD_TYPE, DEFAULT_SUBSCRIPTION_ID, DEFAULT_ZONE_SUFFIX};

use crate::error::{SyncError, SyncResult};

/// Largest page size a fetch may request.
pub const MAX_PAGE_SIZE: u32 = 1000;

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device identity override. When unset the application supplies the
    /// identity at runtime through `SyncEngine::set_device_identity`.
    #[serde(default)]
    pub identity: Option<String>,

    /// Human-readable device name, shown in engine logs.
    #[serde(default)]
    pub name: String,
}

// =============================================================================
// Remote Settings
// =============================================================================

/// Remote record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Record type for event records.
    #[serde(default = "default_record_type")]
    pub record_type: String,

    /// Id of the push subscription registered for `record_type`.
    #[serde(default = "default_subscription_id")]
    pub subscription_id: String,

    /// Suffix appended to the device identity to name its partition.
    #[serde(default = "default_zone_suffix")]
    pub zone_suffix: String,

    /// Whether to register push subscriptions at all.
    /// Disable on platforms without push delivery.
    #[serde(default = "default_true")]
    pub subscriptions_enabled: bool,
}

fn default_record_type() -> String {
    DEFAULT_RECORD_TYPE.to_string()
}

fn default_subscription_id() -> String {
    DEFAULT_SUBSCRIPTION_ID.to_string()
}

fn default_zone_suffix() -> String {
    DEFAULT_ZONE_SUFFIX.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            record_type: default_record_type(),
            subscription_id: default_subscription_id(),
            zone_suffix: default_zone_suffix(),
            subscriptions_enabled: true,
        }
    }
}

// =============================================================================
// Pull Settings
// =============================================================================

/// Paging settings for incremental fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullSettings {
    /// Changed zones requested per database-changes page.
    #[serde(default = "default_page_size")]
    pub database_page_size: u32,

    /// Records requested per zone-changes page.
    #[serde(default = "default_page_size")]
    pub zone_page_size: u32,
}

fn default_page_size() -> u32 {
    200
}

impl Default for PullSettings {
    fn default() -> Self {
        PullSettings {
            database_page_size: default_page_size(),
            zone_page_size: default_page_size(),
        }
    }
}

// =============================================================================
// Cache Settings
// =============================================================================

/// Local cache (SQLite) settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Database file. Defaults to `sip.db` in the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Device-specific configuration.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Remote record store settings.
    #[serde(default)]
    pub remote: RemoteSettings,

    /// Pull paging settings.
    #[serde(default)]
    pub pull: PullSettings,

    /// Local cache settings.
    #[serde(default)]
    pub cache: CacheSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
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
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if let Some(ref identity) = self.device.identity {
            validate_device_identity(identity)
                .map_err(|e| SyncError::InvalidConfig(format!("device.identity: {}", e)))?;
        }

        validate_record_type(&self.remote.record_type)
            .map_err(|e| SyncError::InvalidConfig(format!("remote.record_type: {}", e)))?;

        validate_record_type(&self.remote.subscription_id)
            .map_err(|e| SyncError::InvalidConfig(format!("remote.subscription_id: {}", e)))?;

        if self.remote.zone_suffix.chars().any(char::is_control) {
            return Err(SyncError::InvalidConfig(
                "remote.zone_suffix must not contain control characters".into(),
            ));
        }

        for (name, size) in [
            ("pull.database_page_size", self.pull.database_page_size),
            ("pull.zone_page_size", self.pull.zone_page_size),
        ] {
            if size == 0 || size > MAX_PAGE_SIZE {
                return Err(SyncError::InvalidConfig(format!(
                    "{} must be between 1 and {}",
                    name, MAX_PAGE_SIZE
                )));
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(identity) = std::env::var("SIP_DEVICE_IDENTITY") {
            debug!(identity = %identity, "Overriding device identity from environment");
            self.device.identity = Some(identity);
        }

        if let Ok(name) = std::env::var("SIP_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Ok(record_type) = std::env::var("SIP_RECORD_TYPE") {
            self.remote.record_type = record_type;
        }

        if let Ok(id) = std::env::var("SIP_SUBSCRIPTION_ID") {
            self.remote.subscription_id = id;
        }

        if let Ok(suffix) = std::env::var("SIP_ZONE_SUFFIX") {
            self.remote.zone_suffix = suffix;
        }

        if let Ok(enabled) = std::env::var("SIP_SUBSCRIPTIONS_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.remote.subscriptions_enabled = true,
                "0" | "false" | "no" => self.remote.subscriptions_enabled = false,
                _ => warn!(value = %enabled, "Unknown SIP_SUBSCRIPTIONS_ENABLED value"),
            }
        }

        if let Ok(size) = std::env::var("SIP_DB_PAGE_SIZE") {
            if let Ok(s) = size.parse::<u32>() {
                self.pull.database_page_size = s;
            }
        }

        if let Ok(size) = std::env::var("SIP_ZONE_PAGE_SIZE") {
            if let Ok(s) = size.parse::<u32>() {
                self.pull.zone_page_size = s;
            }
        }

        if let Ok(path) = std::env::var("SIP_DATABASE_PATH") {
            self.cache.database_path = Some(PathBuf::from(path));
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "sip", "sync")
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the configured device identity, if any.
    pub fn device_identity(&self) -> SyncResult<Option<DeviceIdentity>> {
        self.device
            .identity
            .as_deref()
            .map(|id| {
                DeviceIdentity::new(id)
                    .map_err(|e| SyncError::InvalidConfig(format!("device.identity: {}", e)))
            })
            .transpose()
    }

    /// Returns the local cache database path.
    pub fn database_path(&self) -> SyncResult<PathBuf> {
        if let Some(ref path) = self.cache.database_path {
            return Ok(path.clone());
        }

        Self::project_dirs()
            .map(|dirs| dirs.data_dir().join("sip.db"))
            .ok_or_else(|| SyncError::InvalidConfig("No data directory available".into()))
    }

    /// Returns true if push subscriptions should be registered.
    pub fn subscriptions_enabled(&self) -> bool {
        self.remote.subscriptions_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(config.device.identity.is_none());
        assert_eq!(config.remote.record_type, "SipEvent");
        assert_eq!(config.remote.subscription_id, "newSipEvent");
        assert_eq!(config.remote.zone_suffix, " Zone");
        assert!(config.subscriptions_enabled());
        assert_eq!(config.pull.database_page_size, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();

        config.pull.zone_page_size = 0;
        assert!(config.validate().unwrap_err().is_config_error());
        config.pull.zone_page_size = 50;

        config.remote.record_type = "Sip Event".into();
        assert!(config.validate().is_err());
        config.remote.record_type = "SipEvent".into();

        config.remote.zone_suffix = " Zone\n".into();
        assert!(config.validate().unwrap_err().is_config_error());
        config.remote.zone_suffix = " Zone".into();
        assert!(config.validate().is_ok());

        config.device.identity = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_device_identity_accessor() {
        let mut config = SyncConfig::default();
        assert!(config.device_identity().unwrap().is_none());

        config.device.identity = Some("Apple Watch".into());
        assert_eq!(
            config.device_identity().unwrap().unwrap().as_str(),
            "Apple Watch"
        );
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sync.toml");

        let mut config = SyncConfig::default();
        config.device.name = "Wrist".into();
        config.remote.subscriptions_enabled = false;
        config.pull.zone_page_size = 25;
        config.cache.database_path = Some(dir.path().join("sip.db"));
        config.save(Some(path.clone())).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("[remote]"));
        assert!(text.contains("[pull]"));

        let loaded = SyncConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.device.name, "Wrist");
        assert_eq!(loaded.pull.zone_page_size, 25);
        assert_eq!(loaded.database_path().unwrap(), dir.path().join("sip.db"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        std::fs::write(&path, "[pull]\nzone_page_size = 10\n").unwrap();

        let loaded = SyncConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.pull.zone_page_size, 10);
        assert_eq!(loaded.pull.database_page_size, 200);
        assert_eq!(loaded.remote.record_type, "SipEvent");
    }

    #[test]
    fn test_malformed_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        std::fs::write(&path, "[pull\n").unwrap();

        assert!(matches!(
            SyncConfig::load(Some(path.clone())),
            Err(SyncError::ConfigLoadFailed(_))
        ));
        let fallback = SyncConfig::load_or_default(Some(path));
        assert_eq!(fallback.pull.zone_page_size, 200);
    }
}
