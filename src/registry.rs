//! # Device Registry
//!
//! Deduplicating, order-preserving store of discovered devices.
//!
//! Records live in a `Vec` in first-discovery order; a `HashMap` maps each
//! identifier to its slot. Both are only ever touched together inside
//! `upsert` and `clear`, and the registry is owned by a single event loop, so
//! a reader can never see one without the other.

use crate::record::AdvertisementRecord;
use std::collections::HashMap;

/// Which branch an upsert took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    records: Vec<AdvertisementRecord>,
    index: HashMap<String, usize>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new device or overwrite the stored record in place.
    pub fn upsert(&mut self, record: AdvertisementRecord) -> Upsert {
        match self.index.get(&record.identifier) {
            Some(&position) => {
                self.records[position] = record;
                Upsert::Updated
            }
            None => {
                self.index.insert(record.identifier.clone(), self.records.len());
                self.records.push(record);
                Upsert::Inserted
            }
        }
    }

    pub fn get(&self, identifier: &str) -> Option<&AdvertisementRecord> {
        self.index.get(identifier).map(|&position| &self.records[position])
    }

    /// Slot of `identifier` in first-discovery order.
    pub fn position(&self, identifier: &str) -> Option<usize> {
        self.index.get(identifier).copied()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
    }

    /// Records in first-discovery order.
    pub fn snapshot(&self) -> &[AdvertisementRecord] {
        &self.records
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
