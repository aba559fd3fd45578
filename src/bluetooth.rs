//! # btleplug Backend
//!
//! `Adapter` implementation over the host radio via btleplug.
//!
//! `connect` opens the first adapter the platform reports and spawns two
//! tasks:
//! - a pump that reports the adapter's current power state, then turns
//!   btleplug's central event stream into `AdapterEvent`s (power state
//!   updates and discoveries)
//! - a radio worker that runs scan start/stop requests one at a time, in the
//!   order the controller issued them, and reports a failed start back as
//!   `AdapterEvent::ScanFailed`
//!
//! The controller's calls only enqueue work, so they return immediately.
//! btleplug has no duplicate-suppression switch; dedup is left to the
//! registry.

use crate::adapter::{Adapter, AdapterEvent, ScanRequest};
use crate::error::AdapterError;
use crate::record::{AdvertisementPayload, PowerState, RawDiscovery, RSSI_UNAVAILABLE};
use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, PeripheralProperties,
    ScanFilter,
};
use btleplug::platform::{Adapter as PlatformAdapter, Manager, PeripheralId};
use chrono::Utc;
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Work item for the radio worker
#[derive(Debug, Clone, PartialEq, Eq)]
enum RadioCommand {
    Begin(Vec<Uuid>),
    End,
}

pub struct BtleplugAdapter {
    radio: mpsc::UnboundedSender<RadioCommand>,
}

impl BtleplugAdapter {
    /// Opens the first Bluetooth adapter and starts forwarding its events.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn connect(events: mpsc::Sender<AdapterEvent>) -> Result<Self, AdapterError> {
        let manager = Manager::new()
            .await
            .map_err(|e| AdapterError::ManagerInit(e.to_string()))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| AdapterError::ManagerInit(e.to_string()))?;

        let central = adapters.into_iter().next().ok_or(AdapterError::NoAdapters)?;

        let stream = central
            .events()
            .await
            .map_err(|e| AdapterError::ManagerInit(e.to_string()))?;

        if let Ok(info) = central.adapter_info().await {
            log::info!("Using Bluetooth adapter {}", info);
        }

        let initial_state = match central.adapter_state().await {
            Ok(state) => power_state_from(state),
            Err(e) => {
                log::warn!("Could not read adapter power state: {}", e);
                PowerState::Unknown
            }
        };

        let (radio, radio_commands) = mpsc::unbounded_channel();
        let worker_central = central.clone();
        tokio::spawn(run_radio(radio_commands, events.clone(), move |command| {
            let central = worker_central.clone();
            async move {
                let result = match command {
                    RadioCommand::Begin(services) => central.start_scan(ScanFilter { services }).await,
                    RadioCommand::End => central.stop_scan().await,
                };
                result.map_err(|e| AdapterError::ScanFailed(e.to_string()))
            }
        }));

        let pump_central = central;
        tokio::spawn(async move {
            if events
                .send(AdapterEvent::PowerStateChanged(initial_state))
                .await
                .is_err()
            {
                return;
            }

            let mut stream = stream;
            while let Some(event) = stream.next().await {
                let forwarded = match event {
                    CentralEvent::StateUpdate(state) => {
                        AdapterEvent::PowerStateChanged(power_state_from(state))
                    }
                    CentralEvent::DeviceDiscovered(id)
                    | CentralEvent::DeviceUpdated(id)
                    | CentralEvent::ManufacturerDataAdvertisement { id, .. }
                    | CentralEvent::ServicesAdvertisement { id, .. } => {
                        match read_discovery(&pump_central, &id).await {
                            Some(discovery) => AdapterEvent::Discovered(discovery),
                            None => continue,
                        }
                    }
                    _ => continue,
                };
                if events.send(forwarded).await.is_err() {
                    break;
                }
            }
            log::debug!("Bluetooth event stream closed");
        });

        Ok(Self { radio })
    }

    fn enqueue(&self, command: RadioCommand) -> Result<(), AdapterError> {
        self.radio
            .send(command)
            .map_err(|_| AdapterError::ScanFailed("radio worker stopped".to_string()))
    }
}

impl Adapter for BtleplugAdapter {
    fn begin_scan(&mut self, request: &ScanRequest) -> Result<(), AdapterError> {
        self.enqueue(RadioCommand::Begin(request.services.clone()))
    }

    fn end_scan(&mut self) -> Result<(), AdapterError> {
        self.enqueue(RadioCommand::End)
    }
}

pub fn power_state_from(state: CentralState) -> PowerState {
    match state {
        CentralState::Unknown => PowerState::Unknown,
        CentralState::PoweredOn => PowerState::PoweredOn,
        CentralState::PoweredOff => PowerState::PoweredOff,
    }
}

/// Executes radio commands strictly in order. A start that fails is reported
/// as `ScanFailed` so the controller can fall back to `Idle`; stop failures
/// are only logged.
async fn run_radio<F, Fut>(
    mut commands: mpsc::UnboundedReceiver<RadioCommand>,
    events: mpsc::Sender<AdapterEvent>,
    mut execute: F,
) where
    F: FnMut(RadioCommand) -> Fut,
    Fut: Future<Output = Result<(), AdapterError>>,
{
    while let Some(command) = commands.recv().await {
        let starting = matches!(command, RadioCommand::Begin(_));
        if let Err(e) = execute(command).await {
            log::error!("{}", e);
            if starting && events.send(AdapterEvent::ScanFailed(e)).await.is_err() {
                break;
            }
        }
    }
}

async fn read_discovery(central: &PlatformAdapter, id: &PeripheralId) -> Option<RawDiscovery> {
    let peripheral = central.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;
    Some(discovery_from_properties(id.to_string(), properties))
}

fn discovery_from_properties(identifier: String, properties: PeripheralProperties) -> RawDiscovery {
    let manufacturer_data = flatten_manufacturer_data(&properties.manufacturer_data);
    RawDiscovery {
        identifier,
        // btleplug only exposes the advertised name
        name: None,
        payload: AdvertisementPayload {
            local_name: properties.local_name,
            manufacturer_data: Some(manufacturer_data).filter(|data| !data.is_empty()),
            service_uuids: Some(properties.services).filter(|uuids| !uuids.is_empty()),
        },
        signal_strength: properties.rssi.unwrap_or(RSSI_UNAVAILABLE),
        observed_at: Utc::now(),
    }
}

/// Company identifier (little-endian) followed by its payload, ordered by
/// company identifier.
fn flatten_manufacturer_data(data: &HashMap<u16, Vec<u8>>) -> Vec<u8> {
    let mut companies: Vec<_> = data.iter().collect();
    companies.sort_by_key(|(company, _)| **company);

    let mut flat = Vec::new();
    for (company, payload) in companies {
        flat.extend_from_slice(&company.to_le_bytes());
        flat.extend_from_slice(payload);
    }
    flat
}
