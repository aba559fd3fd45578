//! # Configuration Management Module
//!
//! Persistent settings stored in platform-appropriate locations.
//! Handles loading, saving, and providing defaults for configuration options.
//!
//! ## Settings
//! - `filter`: which devices count as "mine" (service UUID, name prefix or
//!   manufacturer marker; one per session)
//! - `logging_enabled`: emit discovery tracing and periodic status reports
//! - `status_interval_secs`: period of the status report
//! - `refresh_delay_ms`: pause between the stop and start halves of a refresh
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/beacon-scout/config.toml
//! - Linux: ~/.config/beacon-scout/config.toml
//! - Windows: %APPDATA%\beacon-scout\config.toml
//!
//! ## Example
//! ```toml
//! logging_enabled = true
//! status_interval_secs = 60
//! refresh_delay_ms = 500
//!
//! [filter]
//! mode = "name_prefix"
//! prefix = "SB-"
//! ```

use crate::controller::REFRESH_DELAY;
use crate::error::ConfigError;
use crate::filter::FilterPolicy;
use crate::status::{MAX_STATUS_INTERVAL, STATUS_INTERVAL};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Service advertised by our devices (Nordic UART service)
pub const DEFAULT_SERVICE_UUID: &str = "6e400001-b5a3-f393-e0a9-e50e24dcca9e";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FilterConfig {
    ServiceUuid { uuids: Vec<String> },
    NamePrefix { prefix: String },
    /// Hex-encoded marker bytes
    ManufacturerMarker { marker: String },
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig::ServiceUuid {
            uuids: vec![DEFAULT_SERVICE_UUID.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging_enabled: bool,
    pub status_interval_secs: u64,
    pub refresh_delay_ms: u64,
    pub filter: FilterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging_enabled: true,
            status_interval_secs: STATUS_INTERVAL.as_secs(),
            refresh_delay_ms: REFRESH_DELAY.as_millis() as u64,
            filter: FilterConfig::default(),
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("beacon-scout")
            .join("config.toml")
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Load config from `path`, or write and return defaults if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(
            self.status_interval_secs
                .clamp(1, MAX_STATUS_INTERVAL.as_secs()),
        )
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }

    /// Build the filter policy, validating UUIDs and marker bytes.
    pub fn filter_policy(&self) -> Result<FilterPolicy, ConfigError> {
        match &self.filter {
            FilterConfig::ServiceUuid { uuids } => uuids
                .iter()
                .map(|value| {
                    Uuid::parse_str(value).map_err(|e| ConfigError::InvalidServiceUuid {
                        value: value.clone(),
                        reason: e.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(FilterPolicy::ServiceUuids),
            FilterConfig::NamePrefix { prefix } => Ok(FilterPolicy::NamePrefix(prefix.clone())),
            FilterConfig::ManufacturerMarker { marker } => hex::decode(marker)
                .map(FilterPolicy::ManufacturerMarker)
                .map_err(|_| ConfigError::InvalidMarker {
                    value: marker.clone(),
                }),
        }
    }
}
