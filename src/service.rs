//! # Scan Service Module
//!
//! Runs the scan controller on its own thread and hands the presentation
//! layer a handle to it.
//!
//! ## Key Components
//! - `drive`: the event loop. Commands, adapter events and controller timers
//!   are all consumed by one `tokio::select!`, which is the only place the
//!   controller is ever touched, so no two handlers can overlap.
//! - `ScanService`: spawns a thread with its own Tokio runtime, connects the
//!   btleplug backend and runs `drive` on it.
//! - `ScanHandle`: commands in, live `ScanView` out (via `tokio::sync::watch`).
//!
//! ## Why a dedicated thread
//! The presentation side may not run inside Tokio at all. Owning the runtime
//! here keeps every adapter call and timer off the caller's thread.

use crate::adapter::{Adapter, AdapterEvent, EVENT_BUFFER};
use crate::bluetooth::BtleplugAdapter;
use crate::config::Config;
use crate::controller::{LatestDeviceObserver, ScanController};
use crate::error::{ConfigError, ServiceError};
use crate::record::{AdvertisementRecord, PowerState};
use crate::status::{LogSink, StatusReporter};
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, watch};

pub enum ScanCommand {
    Start,
    Stop,
    Refresh,
    SetLogging(bool),
    Observe(Box<dyn LatestDeviceObserver>),
    Shutdown,
}

impl fmt::Debug for ScanCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanCommand::Start => f.write_str("Start"),
            ScanCommand::Stop => f.write_str("Stop"),
            ScanCommand::Refresh => f.write_str("Refresh"),
            ScanCommand::SetLogging(enabled) => f.debug_tuple("SetLogging").field(enabled).finish(),
            ScanCommand::Observe(_) => f.write_str("Observe(..)"),
            ScanCommand::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Point-in-time state published to the presentation layer.
///
/// `devices` is shared with readers; the service copies it only when a
/// reader still holds the previous list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanView {
    pub is_scanning: bool,
    pub power_state: PowerState,
    pub logging_enabled: bool,
    pub devices: Arc<Vec<AdvertisementRecord>>,
    pub latest_device: Option<AdvertisementRecord>,
}

/// What a loop iteration touched
enum Change {
    Everything,
    Sighting(String),
    Nothing,
}

fn publish<A: Adapter>(controller: &ScanController<A>, view: &watch::Sender<ScanView>) {
    view.send_if_modified(|current| {
        let mut modified = false;
        if current.is_scanning != controller.is_scanning() {
            current.is_scanning = controller.is_scanning();
            modified = true;
        }
        if current.power_state != controller.power_state() {
            current.power_state = controller.power_state();
            modified = true;
        }
        if current.logging_enabled != controller.logging_enabled() {
            current.logging_enabled = controller.logging_enabled();
            modified = true;
        }
        if current.devices.as_slice() != controller.devices() {
            current.devices = Arc::new(controller.devices().to_vec());
            modified = true;
        }
        if current.latest_device.as_ref() != controller.latest_device() {
            current.latest_device = controller.latest_device().cloned();
            modified = true;
        }
        modified
    });
}

/// Publishes one accepted sighting by patching its slot in the view.
fn publish_sighting<A: Adapter>(
    controller: &ScanController<A>,
    identifier: &str,
    view: &watch::Sender<ScanView>,
) {
    let registry = controller.registry();
    let (Some(position), Some(record)) = (registry.position(identifier), registry.get(identifier))
    else {
        return publish(controller, view);
    };

    view.send_modify(|current| {
        let devices = Arc::make_mut(&mut current.devices);
        match devices.get(position) {
            Some(slot) if slot.identifier == identifier => devices[position] = record.clone(),
            None if position == devices.len() => devices.push(record.clone()),
            _ => *devices = controller.devices().to_vec(),
        }
        current.latest_device = controller.latest_device().cloned();
    });
}

fn handle_event<A: Adapter>(controller: &mut ScanController<A>, event: AdapterEvent) -> Change {
    match event {
        AdapterEvent::Discovered(raw) => {
            let identifier = raw.identifier.clone();
            match controller.handle_discovery(raw) {
                Some(_) => Change::Sighting(identifier),
                None => Change::Nothing,
            }
        }
        event => {
            controller.handle_adapter_event(event);
            Change::Everything
        }
    }
}

fn apply_command<A: Adapter>(controller: &mut ScanController<A>, command: ScanCommand) {
    log::debug!("Scan service: {:?}", command);
    match command {
        ScanCommand::Start => {
            // Failures are logged by the controller and leave it idle
            let _ = controller.start_scanning();
        }
        ScanCommand::Stop => controller.stop_scanning(),
        ScanCommand::Refresh => controller.refresh(),
        ScanCommand::SetLogging(enabled) => controller.set_logging_enabled(enabled),
        ScanCommand::Observe(observer) => controller.set_latest_device_observer(observer),
        ScanCommand::Shutdown => {}
    }
}

/// Runs the controller until `Shutdown` arrives or every command sender is
/// dropped, then tears it down.
pub async fn drive<A: Adapter>(
    mut controller: ScanController<A>,
    mut commands: mpsc::UnboundedReceiver<ScanCommand>,
    mut events: mpsc::Receiver<AdapterEvent>,
    view: watch::Sender<ScanView>,
) {
    publish(&controller, &view);

    loop {
        let change = tokio::select! {
            command = commands.recv() => match command {
                Some(ScanCommand::Shutdown) | None => break,
                Some(command) => {
                    apply_command(&mut controller, command);
                    Change::Everything
                }
            },
            Some(event) = events.recv() => handle_event(&mut controller, event),
            timer = controller.next_timer() => {
                controller.handle_timer(timer);
                Change::Everything
            }
        };
        match change {
            Change::Everything => publish(&controller, &view),
            Change::Sighting(identifier) => publish_sighting(&controller, &identifier, &view),
            Change::Nothing => {}
        }
    }

    controller.teardown();
    publish(&controller, &view);
    log::info!("Scan service: shutting down");
}

/// Spawns the scan service thread.
pub struct ScanService;

impl ScanService {
    pub fn spawn(config: Config) -> Result<ScanHandle, ConfigError> {
        let policy = config.filter_policy()?;
        let (command_sender, command_receiver) = mpsc::unbounded_channel();
        let (view_sender, view_receiver) = watch::channel(ScanView {
            logging_enabled: config.logging_enabled,
            ..ScanView::default()
        });

        let thread = std::thread::spawn(move || {
            let rt = match Runtime::new() {
                Ok(runtime) => runtime,
                Err(e) => {
                    log::error!("{}", ServiceError::RuntimeCreation(e.to_string()));
                    return;
                }
            };

            rt.block_on(async move {
                let (event_sender, event_receiver) = mpsc::channel(EVENT_BUFFER);
                let adapter = match BtleplugAdapter::connect(event_sender).await {
                    Ok(adapter) => adapter,
                    Err(e) => {
                        log::error!("Scan service: {}", e);
                        view_sender.send_modify(|view| view.power_state = PowerState::Unsupported);
                        return;
                    }
                };

                let reporter = StatusReporter::new(config.status_interval(), Box::new(LogSink));
                let mut controller = ScanController::new(adapter, policy, reporter)
                    .with_refresh_delay(config.refresh_delay());
                controller.set_logging_enabled(config.logging_enabled);

                drive(controller, command_receiver, event_receiver, view_sender).await;
            });
        });

        Ok(ScanHandle {
            commands: command_sender,
            view: view_receiver,
            thread: Some(thread),
        })
    }
}

/// Presentation-side handle to a running scan service.
pub struct ScanHandle {
    commands: mpsc::UnboundedSender<ScanCommand>,
    view: watch::Receiver<ScanView>,
    thread: Option<JoinHandle<()>>,
}

impl ScanHandle {
    fn send(&self, command: ScanCommand) -> Result<(), ServiceError> {
        self.commands.send(command).map_err(|_| ServiceError::Stopped)
    }

    pub fn start(&self) -> Result<(), ServiceError> {
        self.send(ScanCommand::Start)
    }

    pub fn stop(&self) -> Result<(), ServiceError> {
        self.send(ScanCommand::Stop)
    }

    pub fn refresh(&self) -> Result<(), ServiceError> {
        self.send(ScanCommand::Refresh)
    }

    pub fn set_logging_enabled(&self, enabled: bool) -> Result<(), ServiceError> {
        self.send(ScanCommand::SetLogging(enabled))
    }

    /// Replaces the latest-device observer.
    pub fn observe_latest<O>(&self, observer: O) -> Result<(), ServiceError>
    where
        O: LatestDeviceObserver + 'static,
    {
        self.send(ScanCommand::Observe(Box::new(observer)))
    }

    pub fn view(&self) -> ScanView {
        self.view.borrow().clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.view.borrow().is_scanning
    }

    pub fn devices(&self) -> Arc<Vec<AdvertisementRecord>> {
        self.view.borrow().devices.clone()
    }

    pub fn latest_device(&self) -> Option<AdvertisementRecord> {
        self.view.borrow().latest_device.clone()
    }

    pub fn logging_enabled(&self) -> bool {
        self.view.borrow().logging_enabled
    }

    pub fn power_state(&self) -> PowerState {
        self.view.borrow().power_state
    }

    /// Stops the service and waits for its thread to exit.
    pub fn shutdown(mut self) {
        let _ = self.send(ScanCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Scan service thread panicked");
            }
        }
    }
}
