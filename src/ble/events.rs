//! Events delivered by the radio adapter.
//!
//! Adapters may either push [`AdapterEvent`]s through a channel or call an
//! [`AdapterDelegate`] directly; [`AdapterEvent::dispatch`] bridges the two.

use bytes::Bytes;

use crate::ble::adapter::AdapterState;
use crate::ble::gatt::{CharacteristicDescriptor, ServiceDescriptor};
use crate::ble::peripheral::{PeripheralHandle, PeripheralId};
use crate::error::AdapterError;

/// Result type used inside adapter events.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Asynchronous event from the radio adapter.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    /// The radio power state changed.
    StateChanged(AdapterState),
    /// A peripheral advertisement was observed.
    PeripheralObserved(PeripheralHandle),
    /// A requested link was established.
    ConnectionEstablished {
        /// The connected peripheral.
        peripheral: PeripheralId,
    },
    /// A requested link could not be established.
    ConnectionFailed {
        /// The target peripheral.
        peripheral: PeripheralId,
        /// Why the connection failed.
        error: AdapterError,
    },
    /// The link went down, requested or not.
    Disconnected {
        /// The peripheral that disconnected.
        peripheral: PeripheralId,
        /// Set when the link dropped because of a failure.
        error: Option<AdapterError>,
    },
    /// Service discovery finished.
    ServicesDiscovered {
        /// The peripheral the services belong to.
        peripheral: PeripheralId,
        /// Discovered services or the failure.
        result: AdapterResult<Vec<ServiceDescriptor>>,
    },
    /// Characteristic discovery for one service finished.
    CharacteristicsDiscovered {
        /// The peripheral the characteristics belong to.
        peripheral: PeripheralId,
        /// The service that was searched.
        service: ServiceDescriptor,
        /// Discovered characteristics or the failure.
        result: AdapterResult<Vec<CharacteristicDescriptor>>,
    },
    /// A characteristic value was read or notified.
    ValueUpdated {
        /// Source peripheral.
        peripheral: PeripheralId,
        /// Source characteristic.
        characteristic: CharacteristicDescriptor,
        /// Payload or the read failure.
        result: AdapterResult<Bytes>,
    },
    /// A write request completed.
    WriteResult {
        /// Target peripheral.
        peripheral: PeripheralId,
        /// Target characteristic.
        characteristic: CharacteristicDescriptor,
        /// Acknowledgment or failure.
        result: AdapterResult<()>,
    },
    /// A notification flag change completed.
    NotificationStateChanged {
        /// Target peripheral.
        peripheral: PeripheralId,
        /// Target characteristic.
        characteristic: CharacteristicDescriptor,
        /// The requested flag.
        enabled: bool,
        /// Acknowledgment or failure.
        result: AdapterResult<()>,
    },
}

impl AdapterEvent {
    /// Short event name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateChanged(_) => "StateChanged",
            Self::PeripheralObserved(_) => "PeripheralObserved",
            Self::ConnectionEstablished { .. } => "ConnectionEstablished",
            Self::ConnectionFailed { .. } => "ConnectionFailed",
            Self::Disconnected { .. } => "Disconnected",
            Self::ServicesDiscovered { .. } => "ServicesDiscovered",
            Self::CharacteristicsDiscovered { .. } => "CharacteristicsDiscovered",
            Self::ValueUpdated { .. } => "ValueUpdated",
            Self::WriteResult { .. } => "WriteResult",
            Self::NotificationStateChanged { .. } => "NotificationStateChanged",
        }
    }

    /// Route this event to the matching delegate callback.
    pub fn dispatch<D: AdapterDelegate + ?Sized>(self, delegate: &mut D) {
        match self {
            Self::StateChanged(state) => delegate.on_state_changed(state),
            Self::PeripheralObserved(handle) => delegate.on_peripheral_observed(handle),
            Self::ConnectionEstablished { peripheral } => delegate.on_connected(peripheral),
            Self::ConnectionFailed { peripheral, error } => {
                delegate.on_connection_failed(peripheral, error)
            }
            Self::Disconnected { peripheral, error } => delegate.on_disconnected(peripheral, error),
            Self::ServicesDiscovered { peripheral, result } => {
                delegate.on_services_discovered(peripheral, result)
            }
            Self::CharacteristicsDiscovered {
                peripheral,
                service,
                result,
            } => delegate.on_characteristics_discovered(peripheral, service, result),
            Self::ValueUpdated {
                peripheral,
                characteristic,
                result,
            } => delegate.on_value_updated(peripheral, characteristic, result),
            Self::WriteResult {
                peripheral,
                characteristic,
                result,
            } => delegate.on_write_result(peripheral, characteristic, result),
            Self::NotificationStateChanged {
                peripheral,
                characteristic,
                enabled,
                result,
            } => delegate.on_notification_state_changed(peripheral, characteristic, enabled, result),
        }
    }
}

/// Callback interface an adapter drives.
pub trait AdapterDelegate {
    /// The radio power state changed.
    fn on_state_changed(&mut self, state: AdapterState);

    /// A peripheral advertisement was observed.
    fn on_peripheral_observed(&mut self, handle: PeripheralHandle);

    /// A requested link was established.
    fn on_connected(&mut self, peripheral: PeripheralId);

    /// A requested link could not be established.
    fn on_connection_failed(&mut self, peripheral: PeripheralId, error: AdapterError);

    /// The link went down.
    fn on_disconnected(&mut self, peripheral: PeripheralId, error: Option<AdapterError>);

    /// Service discovery finished.
    fn on_services_discovered(
        &mut self,
        peripheral: PeripheralId,
        result: AdapterResult<Vec<ServiceDescriptor>>,
    );

    /// Characteristic discovery finished for one service.
    fn on_characteristics_discovered(
        &mut self,
        peripheral: PeripheralId,
        service: ServiceDescriptor,
        result: AdapterResult<Vec<CharacteristicDescriptor>>,
    );

    /// A value was read or notified.
    fn on_value_updated(
        &mut self,
        peripheral: PeripheralId,
        characteristic: CharacteristicDescriptor,
        result: AdapterResult<Bytes>,
    );

    /// A write completed.
    fn on_write_result(
        &mut self,
        peripheral: PeripheralId,
        characteristic: CharacteristicDescriptor,
        result: AdapterResult<()>,
    );

    /// A notification flag change completed.
    fn on_notification_state_changed(
        &mut self,
        _peripheral: PeripheralId,
        _characteristic: CharacteristicDescriptor,
        _enabled: bool,
        _result: AdapterResult<()>,
    ) {
    }
}
