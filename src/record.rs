//! # Advertisement Records
//!
//! Normalized view of a single radio sighting, plus the adapter power states
//! the rest of the crate reasons about.
//!
//! ## Normalization
//! The adapter hands over whatever the peripheral broadcast: names may be
//! empty strings, manufacturer data may be a zero-length blob, the service
//! list may repeat entries. `AdvertisementRecord::from` folds all of those
//! into "absent" so filters and observers only ever check `Option`s.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Signal strength reported when the adapter did not provide one.
pub const RSSI_UNAVAILABLE: i16 = 127;

/// Power state pushed by the host adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PowerState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl PowerState {
    /// Only a powered-on adapter can scan.
    pub fn is_ready(self) -> bool {
        self == PowerState::PoweredOn
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PowerState::Unknown => "unknown",
            PowerState::Resetting => "resetting",
            PowerState::Unsupported => "unsupported",
            PowerState::Unauthorized => "unauthorized",
            PowerState::PoweredOff => "powered off",
            PowerState::PoweredOn => "powered on",
        };
        f.write_str(label)
    }
}

/// Advertisement payload fields as delivered by the adapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdvertisementPayload {
    pub local_name: Option<String>,
    pub manufacturer_data: Option<Vec<u8>>,
    pub service_uuids: Option<Vec<Uuid>>,
}

/// One discovery callback, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDiscovery {
    pub identifier: String,
    pub name: Option<String>,
    pub payload: AdvertisementPayload,
    pub signal_strength: i16,
    pub observed_at: DateTime<Utc>,
}

impl RawDiscovery {
    pub fn new(identifier: impl Into<String>, signal_strength: i16) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
            payload: AdvertisementPayload::default(),
            signal_strength,
            observed_at: Utc::now(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_local_name(mut self, local_name: impl Into<String>) -> Self {
        self.payload.local_name = Some(local_name.into());
        self
    }

    pub fn with_manufacturer_data(mut self, data: Vec<u8>) -> Self {
        self.payload.manufacturer_data = Some(data);
        self
    }

    pub fn with_service_uuids(mut self, uuids: Vec<Uuid>) -> Self {
        self.payload.service_uuids = Some(uuids);
        self
    }
}

/// A discovered device as stored in the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvertisementRecord {
    pub identifier: String,
    /// Connection-level name reported by the adapter
    pub name: Option<String>,
    /// Name carried in the advertisement payload
    pub local_name: Option<String>,
    pub manufacturer_data: Option<Vec<u8>>,
    pub service_uuids: Option<BTreeSet<Uuid>>,
    /// RSSI in dBm at the last sighting
    pub signal_strength: i16,
    pub last_seen_at: DateTime<Utc>,
}

impl AdvertisementRecord {
    /// Name to show for this device, preferring the connection-level name.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.local_name.as_deref())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl From<RawDiscovery> for AdvertisementRecord {
    fn from(raw: RawDiscovery) -> Self {
        let AdvertisementPayload {
            local_name,
            manufacturer_data,
            service_uuids,
        } = raw.payload;

        Self {
            identifier: raw.identifier,
            name: non_empty(raw.name),
            local_name: non_empty(local_name),
            manufacturer_data: manufacturer_data.filter(|data| !data.is_empty()),
            service_uuids: service_uuids
                .map(|uuids| uuids.into_iter().collect::<BTreeSet<_>>())
                .filter(|set| !set.is_empty()),
            signal_strength: raw.signal_strength,
            last_seen_at: raw.observed_at,
        }
    }
}
