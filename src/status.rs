//! # Status Reporter
//!
//! Periodic read-only snapshot of the scan session for observability.
//!
//! The reporter owns the interval timer but never reads controller state
//! itself: the controller captures a `StatusReport` on each tick and hands it
//! back for emission. Ticks are driven by the same event loop as discovery
//! handling, so at most one report is in flight; ticks that come due while a
//! slow sink is still emitting are skipped (`MissedTickBehavior::Skip`)
//! rather than queued.

use crate::record::{AdvertisementRecord, PowerState};
use crate::registry::DeviceRegistry;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};

pub const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound on the report period. Keeps the first deadline representable.
pub const MAX_STATUS_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// One row of a status report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub name: Option<String>,
    pub identifier: String,
    pub signal_strength: i16,
    /// Manufacturer data, hex encoded
    pub manufacturer_data: Option<String>,
}

impl From<&AdvertisementRecord> for DeviceSummary {
    fn from(record: &AdvertisementRecord) -> Self {
        Self {
            name: record.display_name().map(str::to_string),
            identifier: record.identifier.clone(),
            signal_strength: record.signal_strength,
            manufacturer_data: record.manufacturer_data.as_ref().map(hex::encode),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub captured_at: DateTime<Utc>,
    pub is_scanning: bool,
    pub power_state: PowerState,
    pub device_count: usize,
    pub devices: Vec<DeviceSummary>,
}

impl StatusReport {
    pub fn capture(is_scanning: bool, power_state: PowerState, registry: &DeviceRegistry) -> Self {
        Self {
            captured_at: Utc::now(),
            is_scanning,
            power_state,
            device_count: registry.count(),
            devices: registry.snapshot().iter().map(DeviceSummary::from).collect(),
        }
    }
}

/// Destination for status reports
pub trait StatusSink: Send {
    fn emit(&mut self, report: &StatusReport);
}

/// Writes reports through the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn emit(&mut self, report: &StatusReport) {
        log::info!(
            "Status: scanning={} adapter={} devices={}",
            report.is_scanning,
            report.power_state,
            report.device_count
        );
        for device in &report.devices {
            log::info!(
                "  {} [{}] rssi={} mfr={}",
                device.name.as_deref().unwrap_or("<unnamed>"),
                device.identifier,
                device.signal_strength,
                device.manufacturer_data.as_deref().unwrap_or("-")
            );
        }
    }
}

pub struct StatusReporter {
    period: Duration,
    timer: Option<Interval>,
    sink: Box<dyn StatusSink>,
}

impl StatusReporter {
    /// `period` is clamped to between one second and `MAX_STATUS_INTERVAL`.
    pub fn new(period: Duration, sink: Box<dyn StatusSink>) -> Self {
        Self {
            period: period.clamp(Duration::from_secs(1), MAX_STATUS_INTERVAL),
            timer: None,
            sink,
        }
    }

    /// Start ticking; the first tick fires one full period from now.
    /// Re-arming an armed reporter keeps the existing schedule.
    pub fn arm(&mut self) {
        if self.timer.is_some() {
            return;
        }
        let mut timer = tokio::time::interval_at(Instant::now() + self.period, self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.timer = Some(timer);
    }

    /// Stop ticking. Returns whether a timer was actually cancelled.
    pub fn cancel(&mut self) -> bool {
        self.timer.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// Resolves on the next tick; never resolves while disarmed.
    pub async fn tick(&mut self) {
        match self.timer.as_mut() {
            Some(timer) => {
                timer.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    pub fn emit(&mut self, report: &StatusReport) {
        self.sink.emit(report);
    }
}
