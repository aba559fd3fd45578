//! Seam between the scan controller and the host Bluetooth adapter.
//!
//! The adapter is driven through two commands and talks back by pushing
//! `AdapterEvent`s into a channel that the service event loop drains.

use crate::error::AdapterError;
use crate::record::{PowerState, RawDiscovery};
use uuid::Uuid;

/// Capacity of the adapter event channel
pub const EVENT_BUFFER: usize = 256;

/// Parameters for `Adapter::begin_scan`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    /// Restrict delivery to peripherals advertising one of these services.
    /// Empty means an unrestricted scan.
    pub services: Vec<Uuid>,
    pub suppress_duplicates: bool,
}

/// Events pushed by the adapter
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    PowerStateChanged(PowerState),
    Discovered(RawDiscovery),
    /// A scan the adapter accepted could not actually be started
    ScanFailed(AdapterError),
}

/// Host radio control. Implementations must return without blocking; any
/// slow work is handed off to the runtime.
pub trait Adapter: Send {
    fn begin_scan(&mut self, request: &ScanRequest) -> Result<(), AdapterError>;
    fn end_scan(&mut self) -> Result<(), AdapterError>;
}
