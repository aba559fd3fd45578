//! # Filter Policy
//!
//! Decides whether a sighting belongs to "my devices". Exactly one matching
//! strategy is active per session:
//!
//! - `ServiceUuids`: the adapter is told to deliver only peripherals that
//!   advertise one of the services, so everything that reaches us is accepted.
//! - `NamePrefix`: broad scan, accept when the connection name (or, failing
//!   that, the advertised local name) starts with the prefix.
//! - `ManufacturerMarker`: broad scan, accept when the manufacturer data
//!   contains the marker bytes.
//!
//! Evaluation is pure; rejections are expected and never logged.

use crate::record::AdvertisementRecord;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterPolicy {
    ServiceUuids(Vec<Uuid>),
    NamePrefix(String),
    ManufacturerMarker(Vec<u8>),
}

impl FilterPolicy {
    pub fn accepts(&self, candidate: &AdvertisementRecord) -> bool {
        match self {
            FilterPolicy::ServiceUuids(_) => true,
            FilterPolicy::NamePrefix(prefix) => candidate
                .display_name()
                .map(|name| name.starts_with(prefix.as_str()))
                .unwrap_or(false),
            FilterPolicy::ManufacturerMarker(marker) => candidate
                .manufacturer_data
                .as_deref()
                .map(|data| contains_marker(data, marker))
                .unwrap_or(false),
        }
    }

    /// Service restriction to hand to the adapter; empty means a broad scan.
    pub fn scan_services(&self) -> Vec<Uuid> {
        match self {
            FilterPolicy::ServiceUuids(uuids) => uuids.clone(),
            _ => Vec::new(),
        }
    }
}

fn contains_marker(data: &[u8], marker: &[u8]) -> bool {
    marker.is_empty() || data.windows(marker.len()).any(|window| window == marker)
}
