//! Radio adapter backed by btleplug.
//!
//! Requests are queued and executed one at a time by a single worker task,
//! in submission order. Each outcome is posted back as an [`AdapterEvent`]
//! on the channel supplied at construction.

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use chrono::Utc;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::adapter::{AdapterState, DiscoveryScope, RadioAdapter};
use crate::ble::events::AdapterEvent;
use crate::ble::gatt::{CharacteristicDescriptor, ServiceDescriptor, WriteKind};
use crate::ble::peripheral::{PeripheralHandle, PeripheralId};
use crate::error::{AdapterError, AdapterErrorKind, Error, Result};

type Peripherals = Arc<RwLock<HashMap<PeripheralId, Peripheral>>>;
type Listeners = Arc<RwLock<HashMap<PeripheralId, JoinHandle<()>>>>;

/// A radio request waiting for the worker.
enum Request {
    StartScan(ScanFilter),
    StopScan,
    Connect {
        id: PeripheralId,
        peripheral: Peripheral,
    },
    Disconnect {
        id: PeripheralId,
        peripheral: Peripheral,
    },
    DiscoverServices {
        id: PeripheralId,
        peripheral: Peripheral,
        scope: DiscoveryScope,
    },
    DiscoverCharacteristics {
        id: PeripheralId,
        peripheral: Peripheral,
        service: ServiceDescriptor,
        scope: DiscoveryScope,
    },
    SetNotify {
        id: PeripheralId,
        peripheral: Peripheral,
        characteristic: Characteristic,
        descriptor: CharacteristicDescriptor,
        enabled: bool,
    },
    Write {
        id: PeripheralId,
        peripheral: Peripheral,
        characteristic: Characteristic,
        descriptor: CharacteristicDescriptor,
        data: Bytes,
        kind: WriteKind,
    },
}

impl Request {
    fn name(&self) -> &'static str {
        match self {
            Self::StartScan(_) => "start scan",
            Self::StopScan => "stop scan",
            Self::Connect { .. } => "connect",
            Self::Disconnect { .. } => "disconnect",
            Self::DiscoverServices { .. } => "discover services",
            Self::DiscoverCharacteristics { .. } => "discover characteristics",
            Self::SetNotify { .. } => "set notify",
            Self::Write { .. } => "write",
        }
    }
}

/// Run `handle` on each queued request, finishing one before starting the next.
async fn serve<T, F, Fut>(mut requests: mpsc::UnboundedReceiver<T>, mut handle: F)
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = ()>,
{
    while let Some(request) = requests.recv().await {
        handle(request).await;
    }
}

/// Executes requests against btleplug.
#[derive(Clone)]
struct Worker {
    adapter: Adapter,
    events_tx: mpsc::UnboundedSender<AdapterEvent>,
    listeners: Listeners,
}

impl Worker {
    async fn execute(self, request: Request) {
        trace!("Executing {} request", request.name());

        match request {
            Request::StartScan(filter) => {
                if let Err(e) = self.adapter.start_scan(filter).await {
                    error!("Failed to start scan: {}", e);
                }
            }
            Request::StopScan => {
                if let Err(e) = self.adapter.stop_scan().await {
                    error!("Failed to stop scan: {}", e);
                }
            }
            Request::Connect { id, peripheral } => self.connect(id, peripheral).await,
            Request::Disconnect { id, peripheral } => self.disconnect(id, peripheral).await,
            Request::DiscoverServices {
                id,
                peripheral,
                scope,
            } => {
                let result = match peripheral.discover_services().await {
                    Ok(()) => {
                        let services: Vec<ServiceDescriptor> = peripheral
                            .services()
                            .iter()
                            .filter(|s| scope.includes(&s.uuid))
                            .map(ServiceDescriptor::from)
                            .collect();
                        debug!("Discovered {} services on {}", services.len(), id);
                        Ok(services)
                    }
                    Err(e) => Err(AdapterError::from_btleplug(AdapterErrorKind::Discovery, &e)),
                };

                self.post(AdapterEvent::ServicesDiscovered {
                    peripheral: id,
                    result,
                });
            }
            Request::DiscoverCharacteristics {
                id,
                peripheral,
                service,
                scope,
            } => {
                // btleplug discovers characteristics together with services.
                let result = peripheral
                    .services()
                    .into_iter()
                    .find(|s| s.uuid == service.uuid)
                    .map(|s| {
                        s.characteristics
                            .iter()
                            .filter(|c| scope.includes(&c.uuid))
                            .map(CharacteristicDescriptor::from)
                            .collect::<Vec<_>>()
                    })
                    .ok_or_else(|| {
                        AdapterError::new(
                            AdapterErrorKind::Discovery,
                            format!("service {} not found", service.uuid),
                        )
                    });

                self.post(AdapterEvent::CharacteristicsDiscovered {
                    peripheral: id,
                    service,
                    result,
                });
            }
            Request::SetNotify {
                id,
                peripheral,
                characteristic,
                descriptor,
                enabled,
            } => {
                let result = if enabled {
                    peripheral.subscribe(&characteristic).await
                } else {
                    peripheral.unsubscribe(&characteristic).await
                };

                self.post(AdapterEvent::NotificationStateChanged {
                    peripheral: id,
                    characteristic: descriptor,
                    enabled,
                    result: result
                        .map_err(|e| AdapterError::from_btleplug(AdapterErrorKind::Notify, &e)),
                });
            }
            Request::Write {
                id,
                peripheral,
                characteristic,
                descriptor,
                data,
                kind,
            } => {
                let result = peripheral
                    .write(&characteristic, &data, kind.into())
                    .await
                    .map_err(|e| AdapterError::from_btleplug(AdapterErrorKind::Write, &e));

                trace!("Wrote {} bytes to {}", data.len(), descriptor.uuid);

                self.post(AdapterEvent::WriteResult {
                    peripheral: id,
                    characteristic: descriptor,
                    result,
                });
            }
        }
    }

    async fn connect(&self, id: PeripheralId, peripheral: Peripheral) {
        match peripheral.connect().await {
            Ok(()) => {
                info!("Successfully connected to {}", id);
                let listener = self.spawn_listener(id.clone(), peripheral);
                if let Some(previous) = self.listeners.write().insert(id.clone(), listener) {
                    previous.abort();
                }
                self.post(AdapterEvent::ConnectionEstablished { peripheral: id });
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", id, e);
                self.post(AdapterEvent::ConnectionFailed {
                    peripheral: id,
                    error: AdapterError::from_btleplug(AdapterErrorKind::Connection, &e),
                });
            }
        }
    }

    async fn disconnect(&self, id: PeripheralId, peripheral: Peripheral) {
        match peripheral.disconnect().await {
            Ok(()) => {
                info!("Successfully disconnected from {}", id);
                if let Some(listener) = self.listeners.write().remove(&id) {
                    listener.abort();
                }
                // Not every platform reports a central disconnect event
                // for a requested disconnect; duplicates are ignored.
                self.post(AdapterEvent::Disconnected {
                    peripheral: id,
                    error: None,
                });
            }
            Err(e) => error!("Failed to disconnect from {}: {}", id, e),
        }
    }

    /// Forward notifications of a connected peripheral as value updates.
    fn spawn_listener(&self, id: PeripheralId, peripheral: Peripheral) -> JoinHandle<()> {
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(n) => n,
                Err(e) => {
                    error!("Failed to get notifications stream: {}", e);
                    return;
                }
            };

            while let Some(notification) = notifications.next().await {
                trace!(
                    "Notification from {}: {} bytes",
                    notification.uuid,
                    notification.value.len()
                );

                let characteristic = match peripheral
                    .characteristics()
                    .iter()
                    .find(|c| c.uuid == notification.uuid)
                {
                    Some(c) => CharacteristicDescriptor::from(c),
                    None => {
                        debug!("Notification from unknown characteristic {}", notification.uuid);
                        continue;
                    }
                };

                let _ = events_tx.send(AdapterEvent::ValueUpdated {
                    peripheral: id.clone(),
                    characteristic,
                    result: Ok(Bytes::from(notification.value)),
                });
            }

            debug!("Notification listener for {} stopped", id);
        })
    }

    fn post(&self, event: AdapterEvent) {
        if self.events_tx.send(event).is_err() {
            debug!("Adapter event dropped, receiver is gone");
        }
    }
}

/// [`RadioAdapter`] over the system Bluetooth stack.
pub struct BtleplugAdapter {
    /// The BLE adapter in use.
    adapter: Adapter,
    /// Last reported power state.
    state: Arc<RwLock<AdapterState>>,
    /// Peripherals seen so far, by identifier.
    peripherals: Peripherals,
    /// Request queue drained by the worker task.
    requests_tx: mpsc::UnboundedSender<Request>,
    /// Central event task.
    event_handle: JoinHandle<()>,
    /// Notification listener per connected peripheral.
    listeners: Listeners,
}

impl BtleplugAdapter {
    /// Open the first Bluetooth adapter on the system.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(events_tx: mpsc::UnboundedSender<AdapterEvent>) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Self::with_adapter(adapter, events_tx).await
    }

    /// Use a specific btleplug adapter.
    pub async fn with_adapter(
        adapter: Adapter,
        events_tx: mpsc::UnboundedSender<AdapterEvent>,
    ) -> Result<Self> {
        let mut central_events = adapter.events().await?;

        // Having an adapter at all is the best readiness signal btleplug
        // offers up front; StateUpdate events refine it later.
        let state = Arc::new(RwLock::new(AdapterState::PoweredOn));
        let peripherals: Peripherals = Arc::new(RwLock::new(HashMap::new()));
        let listeners: Listeners = Arc::new(RwLock::new(HashMap::new()));

        let event_handle = {
            let adapter = adapter.clone();
            let state = state.clone();
            let peripherals = peripherals.clone();
            let listeners = listeners.clone();
            let events_tx = events_tx.clone();

            tokio::spawn(async move {
                while let Some(event) = central_events.next().await {
                    Self::handle_central_event(
                        event,
                        &adapter,
                        &state,
                        &peripherals,
                        &listeners,
                        &events_tx,
                    )
                    .await;
                }
                debug!("Central event loop ended");
            })
        };

        // The worker exits once every sender is dropped and the queue drains.
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            adapter: adapter.clone(),
            events_tx,
            listeners: listeners.clone(),
        };
        tokio::spawn(async move {
            serve(requests_rx, move |request| worker.clone().execute(request)).await;
            debug!("Request worker ended");
        });

        Ok(Self {
            adapter,
            state,
            peripherals,
            requests_tx,
            event_handle,
            listeners,
        })
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn handle_central_event(
        event: CentralEvent,
        adapter: &Adapter,
        state: &RwLock<AdapterState>,
        peripherals: &Peripherals,
        listeners: &Listeners,
        events_tx: &mpsc::UnboundedSender<AdapterEvent>,
    ) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                trace!("Device seen: {:?}", id);
                Self::observe_peripheral(adapter, id, peripherals, events_tx).await;
            }
            CentralEvent::DeviceConnected(id) => {
                debug!("Device connected: {:?}", id);
            }
            CentralEvent::DeviceDisconnected(id) => {
                debug!("Device disconnected: {:?}", id);
                let peripheral = PeripheralId::new(id.to_string());
                if let Some(listener) = listeners.write().remove(&peripheral) {
                    listener.abort();
                }
                let _ = events_tx.send(AdapterEvent::Disconnected {
                    peripheral,
                    error: None,
                });
            }
            CentralEvent::StateUpdate(central_state) => {
                let new_state = AdapterState::from(central_state);
                *state.write() = new_state;
                let _ = events_tx.send(AdapterEvent::StateChanged(new_state));
            }
            _ => {}
        }
    }

    async fn observe_peripheral(
        adapter: &Adapter,
        id: btleplug::platform::PeripheralId,
        peripherals: &Peripherals,
        events_tx: &mpsc::UnboundedSender<AdapterEvent>,
    ) {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return,
        };

        let identifier = PeripheralId::new(id.to_string());
        let handle = PeripheralHandle {
            id: identifier.clone(),
            name: properties.local_name.clone(),
            local_name: properties.local_name,
            rssi: properties.rssi,
            services: properties.services,
            manufacturer_data: properties
                .manufacturer_data
                .into_iter()
                .map(|(company, data)| (company, Bytes::from(data)))
                .collect(),
            last_seen: Utc::now(),
        };

        peripherals.write().insert(identifier, peripheral);
        let _ = events_tx.send(AdapterEvent::PeripheralObserved(handle));
    }

    fn peripheral(&self, id: &PeripheralId) -> Result<Peripheral> {
        self.peripherals
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::PeripheralNotFound {
                identifier: id.to_string(),
            })
    }

    fn characteristic(
        peripheral: &Peripheral,
        descriptor: &CharacteristicDescriptor,
    ) -> Result<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == descriptor.uuid && c.service_uuid == descriptor.service_uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: descriptor.uuid.to_string(),
            })
    }

    fn submit(&self, request: Request) -> Result<()> {
        let name = request.name();
        self.requests_tx
            .send(request)
            .map_err(|_| Error::Internal(format!("request queue closed, dropped {}", name)))
    }
}

impl RadioAdapter for BtleplugAdapter {
    fn state(&self) -> AdapterState {
        *self.state.read()
    }

    fn start_scan(&self, services: &[Uuid]) -> Result<()> {
        self.submit(Request::StartScan(ScanFilter {
            services: services.to_vec(),
        }))
    }

    fn stop_scan(&self) -> Result<()> {
        self.submit(Request::StopScan)
    }

    fn connect(&self, id: &PeripheralId) -> Result<()> {
        let peripheral = self.peripheral(id)?;
        self.submit(Request::Connect {
            id: id.clone(),
            peripheral,
        })
    }

    fn disconnect(&self, id: &PeripheralId) -> Result<()> {
        let peripheral = self.peripheral(id)?;
        self.submit(Request::Disconnect {
            id: id.clone(),
            peripheral,
        })
    }

    fn discover_services(&self, id: &PeripheralId, scope: DiscoveryScope) -> Result<()> {
        let peripheral = self.peripheral(id)?;
        self.submit(Request::DiscoverServices {
            id: id.clone(),
            peripheral,
            scope,
        })
    }

    fn discover_characteristics(
        &self,
        id: &PeripheralId,
        service: &ServiceDescriptor,
        scope: DiscoveryScope,
    ) -> Result<()> {
        let peripheral = self.peripheral(id)?;
        self.submit(Request::DiscoverCharacteristics {
            id: id.clone(),
            peripheral,
            service: *service,
            scope,
        })
    }

    fn set_notify(
        &self,
        id: &PeripheralId,
        descriptor: &CharacteristicDescriptor,
        enabled: bool,
    ) -> Result<()> {
        let peripheral = self.peripheral(id)?;
        let characteristic = Self::characteristic(&peripheral, descriptor)?;
        self.submit(Request::SetNotify {
            id: id.clone(),
            peripheral,
            characteristic,
            descriptor: *descriptor,
            enabled,
        })
    }

    fn write(
        &self,
        id: &PeripheralId,
        descriptor: &CharacteristicDescriptor,
        data: Bytes,
        kind: WriteKind,
    ) -> Result<()> {
        let peripheral = self.peripheral(id)?;
        let characteristic = Self::characteristic(&peripheral, descriptor)?;
        self.submit(Request::Write {
            id: id.clone(),
            peripheral,
            characteristic,
            descriptor: *descriptor,
            data,
            kind,
        })
    }
}

impl Drop for BtleplugAdapter {
    fn drop(&mut self) {
        self.event_handle.abort();
        for (_, listener) in self.listeners.write().drain() {
            listener.abort();
        }
    }
}
