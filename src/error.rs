//! # Error Types Module
//!
//! Centralized error handling for beacon-scout.
//!
//! ## Error Types
//! - `ScanError`: a scan could not be started
//! - `AdapterError`: the host Bluetooth adapter rejected a request
//! - `ConfigError`: configuration file I/O, parsing and validation
//! - `ServiceError`: the background scan service is gone or never started
//!
//! None of these are fatal. Callers log them and keep going; the scan state
//! simply stays `Idle` until the condition clears.

use crate::record::PowerState;
use thiserror::Error;

/// Errors that can occur when starting a scan
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    /// Start requested while the adapter is not powered on
    #[error("Bluetooth adapter is not ready (power state: {0})")]
    AdapterNotReady(PowerState),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Errors reported by the host adapter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("Failed to initialize Bluetooth manager: {0}")]
    ManagerInit(String),
    #[error("No Bluetooth adapters found")]
    NoAdapters,
    #[error("Scan operation failed: {0}")]
    ScanFailed(String),
}

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFailed(#[source] std::io::Error),
    #[error("Failed to write config file: {0}")]
    WriteFailed(#[source] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("Invalid service UUID {value:?}: {reason}")]
    InvalidServiceUuid { value: String, reason: String },
    #[error("Invalid manufacturer marker {value:?}: expected hex bytes")]
    InvalidMarker { value: String },
}

/// Errors from the background scan service
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("Failed to create async runtime: {0}")]
    RuntimeCreation(String),
    #[error("Scan service is not running")]
    Stopped,
}
