//! # Scan Controller
//!
//! State machine tying the adapter lifecycle to the filter policy, the device
//! registry and the status reporter.
//!
//! ## States
//! - `Idle`: not scanning; registry holds the last session's results
//! - `Scanning`: adapter is scanning, discoveries flow into the registry
//!
//! ## Transitions
//! - `start_scanning`: guarded on a powered-on adapter. Clears the registry
//!   and the latest device, arms the status timer and asks the adapter to
//!   scan with the policy's service restriction and duplicate suppression on.
//! - `stop_scanning`: idempotent. Ends the adapter scan, cancels the status
//!   timer, leaves the registry intact.
//! - power loss while scanning, or the adapter reporting that the scan it
//!   accepted never started: same as `stop_scanning`.
//! - `refresh`: stop, forget the latest device, start again after a short
//!   delay so the adapter settles between the two calls.
//!
//! Every method here is synchronous and non-blocking. The controller is meant
//! to be owned by a single event loop (see `service::drive`), which is what
//! serializes discovery callbacks, power changes and timer ticks.

use crate::adapter::{Adapter, AdapterEvent, ScanRequest};
use crate::error::ScanError;
use crate::filter::FilterPolicy;
use crate::record::{AdvertisementRecord, PowerState, RawDiscovery};
use crate::registry::{DeviceRegistry, Upsert};
use crate::status::{StatusReport, StatusReporter};
use std::future::pending;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::Sleep;

/// Gap between the stop and start halves of `refresh`
pub const REFRESH_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

/// Timer that came due in `ScanController::next_timer`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    StatusTick,
    RestartDue,
}

/// Controller-owned session state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanSession {
    pub is_scanning: bool,
    pub latest_device: Option<AdvertisementRecord>,
    pub logging_enabled: bool,
    pub power_state: PowerState,
}

/// Receives every accepted discovery. Only one observer is registered at a
/// time; registering another replaces it.
pub trait LatestDeviceObserver: Send {
    fn latest_device(&mut self, record: &AdvertisementRecord, outcome: Upsert);
}

impl<F> LatestDeviceObserver for F
where
    F: FnMut(&AdvertisementRecord, Upsert) + Send,
{
    fn latest_device(&mut self, record: &AdvertisementRecord, outcome: Upsert) {
        self(record, outcome)
    }
}

pub struct ScanController<A: Adapter> {
    adapter: A,
    policy: FilterPolicy,
    registry: DeviceRegistry,
    session: ScanSession,
    observer: Option<Box<dyn LatestDeviceObserver>>,
    reporter: StatusReporter,
    refresh_delay: Duration,
    pending_restart: Option<Pin<Box<Sleep>>>,
}

impl<A: Adapter> ScanController<A> {
    pub fn new(adapter: A, policy: FilterPolicy, reporter: StatusReporter) -> Self {
        Self {
            adapter,
            policy,
            registry: DeviceRegistry::new(),
            session: ScanSession {
                logging_enabled: true,
                ..ScanSession::default()
            },
            observer: None,
            reporter,
            refresh_delay: REFRESH_DELAY,
            pending_restart: None,
        }
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn state(&self) -> ScanState {
        if self.session.is_scanning {
            ScanState::Scanning
        } else {
            ScanState::Idle
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.session.is_scanning
    }

    pub fn session(&self) -> &ScanSession {
        &self.session
    }

    pub fn devices(&self) -> &[AdvertisementRecord] {
        self.registry.snapshot()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn latest_device(&self) -> Option<&AdvertisementRecord> {
        self.session.latest_device.as_ref()
    }

    pub fn power_state(&self) -> PowerState {
        self.session.power_state
    }

    pub fn logging_enabled(&self) -> bool {
        self.session.logging_enabled
    }

    pub fn set_logging_enabled(&mut self, enabled: bool) {
        self.session.logging_enabled = enabled;
    }

    pub fn has_pending_restart(&self) -> bool {
        self.pending_restart.is_some()
    }

    pub fn status_timer_armed(&self) -> bool {
        self.reporter.is_armed()
    }

    pub fn set_latest_device_observer(&mut self, observer: Box<dyn LatestDeviceObserver>) {
        self.observer = Some(observer);
    }

    pub fn start_scanning(&mut self) -> Result<(), ScanError> {
        let power_state = self.session.power_state;
        if !power_state.is_ready() {
            log::warn!("Cannot start scanning: adapter is {}", power_state);
            return Err(ScanError::AdapterNotReady(power_state));
        }

        let request = ScanRequest {
            services: self.policy.scan_services(),
            suppress_duplicates: true,
        };
        if let Err(e) = self.adapter.begin_scan(&request) {
            log::error!("Failed to start scanning: {}", e);
            return Err(e.into());
        }

        self.pending_restart = None;
        self.registry.clear();
        self.session.latest_device = None;
        self.session.is_scanning = true;
        self.reporter.arm();

        if request.services.is_empty() {
            log::info!("Scanning started (unrestricted)");
        } else {
            log::info!("Scanning started for services {:?}", request.services);
        }
        Ok(())
    }

    pub fn stop_scanning(&mut self) {
        self.pending_restart = None;
        self.halt("stop requested");
    }

    /// Stop if scanning, forget the latest device and schedule a restart.
    pub fn refresh(&mut self) {
        self.halt("refresh");
        self.session.latest_device = None;
        self.pending_restart = Some(Box::pin(tokio::time::sleep(self.refresh_delay)));
        log::debug!("Restart scheduled in {:?}", self.refresh_delay);
    }

    /// Cancels timers first, then releases the adapter and the observer.
    pub fn teardown(&mut self) {
        self.pending_restart = None;
        self.reporter.cancel();
        self.halt("teardown");
        self.observer = None;
    }

    pub fn handle_adapter_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::PowerStateChanged(state) => self.handle_power_state(state),
            AdapterEvent::Discovered(raw) => {
                self.handle_discovery(raw);
            }
            AdapterEvent::ScanFailed(e) => {
                log::error!("Scan could not be started: {}", e);
                self.halt("adapter scan failed");
            }
        }
    }

    pub fn handle_power_state(&mut self, state: PowerState) {
        let previous = self.session.power_state;
        self.session.power_state = state;
        if previous != state {
            log::info!("Adapter power state: {} -> {}", previous, state);
        }

        if self.session.is_scanning && !state.is_ready() {
            self.halt("adapter power lost");
        }
    }

    /// Hot path. Returns the upsert outcome for accepted sightings.
    pub fn handle_discovery(&mut self, raw: RawDiscovery) -> Option<Upsert> {
        if !self.session.is_scanning {
            return None;
        }

        let record = AdvertisementRecord::from(raw);
        if !self.policy.accepts(&record) {
            return None;
        }

        let outcome = self.registry.upsert(record.clone());
        if self.session.logging_enabled {
            log::debug!(
                "{} {} [{}] rssi={}",
                match outcome {
                    Upsert::Inserted => "Discovered",
                    Upsert::Updated => "Updated",
                },
                record.display_name().unwrap_or("<unnamed>"),
                record.identifier,
                record.signal_strength
            );
        }

        if let Some(observer) = self.observer.as_mut() {
            observer.latest_device(&record, outcome);
        }
        self.session.latest_device = Some(record);
        Some(outcome)
    }

    /// Waits for the status timer or the pending refresh restart, whichever
    /// comes first. Never resolves while neither is armed.
    pub async fn next_timer(&mut self) -> TimerEvent {
        tokio::select! {
            _ = self.reporter.tick() => TimerEvent::StatusTick,
            _ = restart_due(&mut self.pending_restart) => TimerEvent::RestartDue,
        }
    }

    pub fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::StatusTick => self.report_status(),
            TimerEvent::RestartDue => {
                self.pending_restart = None;
                // Not-ready is already logged; the caller retries after the
                // next power state change.
                let _ = self.start_scanning();
            }
        }
    }

    pub fn report_status(&mut self) {
        if !self.session.is_scanning || !self.session.logging_enabled {
            return;
        }
        let report = StatusReport::capture(
            self.session.is_scanning,
            self.session.power_state,
            &self.registry,
        );
        self.reporter.emit(&report);
    }

    // Shared body of stop, power loss and teardown. Safe to call when idle.
    fn halt(&mut self, reason: &str) {
        if self.session.is_scanning {
            if let Err(e) = self.adapter.end_scan() {
                log::error!("Failed to stop scanning: {}", e);
            }
            self.session.is_scanning = false;
            log::info!("Scanning stopped ({}), {} devices retained", reason, self.registry.count());
        }
        self.reporter.cancel();
    }
}

async fn restart_due(slot: &mut Option<Pin<Box<Sleep>>>) {
    match slot.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use crate::status::STATUS_INTERVAL;
    use crate::testing::{AdapterCall, MockAdapter, RecordingSink};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn controller(policy: FilterPolicy) -> (ScanController<MockAdapter>, MockAdapter) {
        let adapter = MockAdapter::new();
        let (sink, _reports) = RecordingSink::new();
        let reporter = StatusReporter::new(STATUS_INTERVAL, Box::new(sink));
        (ScanController::new(adapter.clone(), policy, reporter), adapter)
    }

    fn powered_on(policy: FilterPolicy) -> (ScanController<MockAdapter>, MockAdapter) {
        let (mut controller, adapter) = controller(policy);
        controller.handle_power_state(PowerState::PoweredOn);
        (controller, adapter)
    }

    fn any_device() -> FilterPolicy {
        FilterPolicy::ServiceUuids(vec![uuid::Uuid::from_u128(0xabcd)])
    }

    fn sighting(id: &str, rssi: i16) -> RawDiscovery {
        RawDiscovery::new(id, rssi).with_name(format!("SB-{}", id))
    }

    #[test]
    fn test_start_requires_powered_on_adapter() {
        let (mut controller, adapter) = controller(any_device());
        controller.handle_power_state(PowerState::PoweredOff);

        let result = controller.start_scanning();
        assert_eq!(result, Err(ScanError::AdapterNotReady(PowerState::PoweredOff)));
        assert!(!controller.is_scanning());
        assert_eq!(controller.registry().count(), 0);
        assert!(adapter.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_requests_filtered_scan() {
        let service = uuid::Uuid::from_u128(0xabcd);
        let (mut controller, adapter) = powered_on(FilterPolicy::ServiceUuids(vec![service]));

        controller.start_scanning().unwrap();
        assert_eq!(controller.state(), ScanState::Scanning);
        assert_eq!(
            adapter.calls(),
            vec![AdapterCall::BeginScan(ScanRequest {
                services: vec![service],
                suppress_duplicates: true,
            })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_adapter_failure_leaves_controller_idle() {
        let (mut controller, adapter) = powered_on(any_device());
        adapter.set_fail_begin(true);

        assert!(matches!(controller.start_scanning(), Err(ScanError::Adapter(_))));
        assert_eq!(controller.state(), ScanState::Idle);

        adapter.set_fail_begin(false);
        assert!(controller.start_scanning().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_scan_failure_returns_to_idle() {
        let (mut controller, adapter) = powered_on(any_device());
        controller.start_scanning().unwrap();
        controller.handle_discovery(sighting("a", -50));

        controller.handle_adapter_event(AdapterEvent::ScanFailed(AdapterError::ScanFailed(
            "radio busy".to_string(),
        )));
        assert_eq!(controller.state(), ScanState::Idle);
        assert!(!controller.status_timer_armed());
        assert_eq!(controller.registry().count(), 1);
        assert_eq!(adapter.calls().last(), Some(&AdapterCall::EndScan));

        // Discoveries still in flight are dropped
        assert_eq!(controller.handle_discovery(sighting("b", -50)), None);
        assert!(controller.start_scanning().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_timer_follows_scan_state() {
        let (mut controller, _adapter) = powered_on(any_device());
        assert!(!controller.status_timer_armed());

        controller.start_scanning().unwrap();
        assert!(controller.status_timer_armed());
        controller.stop_scanning();
        assert!(!controller.status_timer_armed());

        controller.start_scanning().unwrap();
        assert!(controller.status_timer_armed());
        controller.stop_scanning();
        controller.stop_scanning();
        assert!(!controller.status_timer_armed());

        let fired = tokio::time::timeout(STATUS_INTERVAL * 3, controller.next_timer()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedup_and_replace_in_place() {
        let (mut controller, _adapter) = powered_on(any_device());
        controller.start_scanning().unwrap();

        assert_eq!(controller.handle_discovery(sighting("a", -80)), Some(Upsert::Inserted));
        assert_eq!(controller.handle_discovery(sighting("b", -70)), Some(Upsert::Inserted));
        assert_eq!(controller.handle_discovery(sighting("a", -30)), Some(Upsert::Updated));

        let devices = controller.devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].identifier, "a");
        assert_eq!(devices[0].signal_strength, -30);
        assert_eq!(devices[1].identifier, "b");

        // Latest device follows updates too, not only new devices
        assert_eq!(controller.latest_device().map(|d| d.signal_strength), Some(-30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_sightings_have_no_side_effects() {
        let (mut controller, _adapter) = powered_on(FilterPolicy::NamePrefix("SB-".into()));
        controller.start_scanning().unwrap();

        assert_eq!(controller.handle_discovery(RawDiscovery::new("x", -50).with_name("Other")), None);
        assert_eq!(controller.handle_discovery(RawDiscovery::new("y", -50)), None);
        assert_eq!(controller.registry().count(), 0);
        assert!(controller.latest_device().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_on_start() {
        let (mut controller, _adapter) = powered_on(any_device());
        controller.start_scanning().unwrap();
        for id in ["a", "b", "c"] {
            controller.handle_discovery(sighting(id, -50));
        }

        controller.stop_scanning();
        assert_eq!(controller.registry().count(), 3);

        controller.start_scanning().unwrap();
        assert_eq!(controller.registry().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let (mut controller, adapter) = powered_on(any_device());
        controller.start_scanning().unwrap();
        controller.handle_discovery(sighting("a", -50));

        controller.stop_scanning();
        let after_first = controller.session().clone();
        let calls_after_first = adapter.calls().len();

        controller.stop_scanning();
        assert_eq!(controller.session(), &after_first);
        assert_eq!(adapter.calls().len(), calls_after_first);
        assert_eq!(controller.registry().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discoveries_while_idle_are_dropped() {
        let (mut controller, _adapter) = powered_on(any_device());
        assert_eq!(controller.handle_discovery(sighting("a", -50)), None);

        controller.start_scanning().unwrap();
        controller.handle_discovery(sighting("a", -50));
        controller.stop_scanning();
        assert_eq!(controller.handle_discovery(sighting("late", -50)), None);
        assert_eq!(controller.registry().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_loss_stops_scan() {
        let (mut controller, adapter) = powered_on(any_device());
        controller.start_scanning().unwrap();
        controller.handle_discovery(sighting("a", -50));

        controller.handle_adapter_event(AdapterEvent::PowerStateChanged(PowerState::Resetting));
        assert!(!controller.is_scanning());
        assert_eq!(controller.registry().count(), 1);
        assert_eq!(adapter.calls().last(), Some(&AdapterCall::EndScan));

        // Retry once the adapter is back
        assert!(controller.start_scanning().is_err());
        controller.handle_power_state(PowerState::PoweredOn);
        assert!(controller.start_scanning().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_clears_latest_then_restarts() {
        let (mut controller, _adapter) = powered_on(any_device());
        controller.start_scanning().unwrap();
        controller.handle_discovery(sighting("x", -50));
        assert!(controller.latest_device().is_some());

        let requested = Instant::now();
        controller.refresh();
        assert!(controller.latest_device().is_none());
        assert!(!controller.is_scanning());

        let event = controller.next_timer().await;
        assert_eq!(event, TimerEvent::RestartDue);
        assert!(requested.elapsed() >= REFRESH_DELAY);

        controller.handle_timer(event);
        assert!(controller.is_scanning());
        assert!(!controller.has_pending_restart());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_from_idle_starts_scanning() {
        let (mut controller, _adapter) = powered_on(any_device());
        controller.refresh();

        let event = controller.next_timer().await;
        controller.handle_timer(event);
        assert!(controller.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_restart() {
        let (mut controller, _adapter) = powered_on(any_device());
        controller.refresh();
        controller.stop_scanning();
        assert!(!controller.has_pending_restart());

        let fired = tokio::time::timeout(REFRESH_DELAY * 4, controller.next_timer()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_report_while_scanning() {
        let adapter = MockAdapter::new();
        let (sink, reports) = RecordingSink::new();
        let reporter = StatusReporter::new(STATUS_INTERVAL, Box::new(sink));
        let mut controller = ScanController::new(adapter, any_device(), reporter);
        controller.handle_power_state(PowerState::PoweredOn);
        controller.start_scanning().unwrap();
        controller.handle_discovery(sighting("a", -61));

        let event = controller.next_timer().await;
        assert_eq!(event, TimerEvent::StatusTick);
        controller.handle_timer(event);

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_scanning);
        assert_eq!(reports[0].power_state, PowerState::PoweredOn);
        assert_eq!(reports[0].device_count, 1);
        assert_eq!(reports[0].devices[0].signal_strength, -61);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_suppressed_when_logging_disabled() {
        let adapter = MockAdapter::new();
        let (sink, reports) = RecordingSink::new();
        let reporter = StatusReporter::new(STATUS_INTERVAL, Box::new(sink));
        let mut controller = ScanController::new(adapter, any_device(), reporter);
        controller.handle_power_state(PowerState::PoweredOn);
        controller.set_logging_enabled(false);
        controller.start_scanning().unwrap();

        let event = controller.next_timer().await;
        controller.handle_timer(event);
        assert!(reports.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_registered_observer_wins() {
        let (mut controller, _adapter) = powered_on(any_device());
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));

        let seen = first.clone();
        controller.set_latest_device_observer(Box::new(move |record: &AdvertisementRecord, _: Upsert| {
            seen.lock().unwrap().push(record.identifier.clone());
        }));
        controller.start_scanning().unwrap();
        controller.handle_discovery(sighting("a", -50));

        let seen = second.clone();
        controller.set_latest_device_observer(Box::new(move |record: &AdvertisementRecord, outcome: Upsert| {
            seen.lock().unwrap().push((record.identifier.clone(), outcome));
        }));
        controller.handle_discovery(sighting("a", -40));
        controller.handle_discovery(sighting("b", -40));

        assert_eq!(*first.lock().unwrap(), vec!["a".to_string()]);
        assert_eq!(
            *second.lock().unwrap(),
            vec![
                ("a".to_string(), Upsert::Updated),
                ("b".to_string(), Upsert::Inserted),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_cancels_timers_and_scan() {
        let (mut controller, adapter) = powered_on(any_device());
        controller.start_scanning().unwrap();
        controller.refresh();
        controller.teardown();

        assert!(!controller.is_scanning());
        assert!(!controller.has_pending_restart());
        let fired = tokio::time::timeout(STATUS_INTERVAL * 2, controller.next_timer()).await;
        assert!(fired.is_err());
        assert_eq!(
            adapter.calls().iter().filter(|c| **c == AdapterCall::EndScan).count(),
            1
        );
    }
}
