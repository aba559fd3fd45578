//! Bluetooth Low Energy device discovery.
//!
//! Scans for nearby peripherals that belong to us (by advertised service,
//! name prefix or manufacturer marker), deduplicates them by identifier and
//! keeps an order-stable list plus the most recently seen device.
//!
//! ## Modules
//! - [`record`]: normalized advertisement records and adapter power states
//! - [`registry`]: deduplicating, first-seen-ordered device store
//! - [`filter`]: "is this one of my devices" policy
//! - [`adapter`]: seam to the host radio; [`bluetooth`] implements it with btleplug
//! - [`controller`]: scan lifecycle state machine
//! - [`status`]: periodic status snapshots
//! - [`service`]: single-threaded event loop and presentation handle
//! - [`config`], [`error`]

pub mod adapter;
pub mod bluetooth;
pub mod config;
pub mod controller;
pub mod error;
pub mod filter;
pub mod record;
pub mod registry;
pub mod service;
pub mod status;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use controller::{LatestDeviceObserver, ScanController, ScanState};
pub use error::{AdapterError, ConfigError, ScanError, ServiceError};
pub use filter::FilterPolicy;
pub use record::{AdvertisementRecord, PowerState};
pub use registry::{DeviceRegistry, Upsert};
pub use service::{ScanHandle, ScanService, ScanView};
