//! Radio adapter contract.
//!
//! The session controller never touches the radio directly. It issues
//! requests through [`RadioAdapter`] and observes their results later as
//! [`AdapterEvent`](crate::ble::events::AdapterEvent)s, so every method here
//! returns as soon as the request has been submitted.

use bytes::Bytes;
use uuid::Uuid;

use crate::ble::gatt::{CharacteristicDescriptor, ServiceDescriptor, WriteKind};
use crate::ble::peripheral::PeripheralId;
use crate::error::Result;

/// Power/authorization state reported by the radio adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdapterState {
    /// State not yet known.
    #[default]
    Unknown,
    /// The stack is resetting.
    Resetting,
    /// The platform has no BLE support.
    Unsupported,
    /// The application is not allowed to use Bluetooth.
    Unauthorized,
    /// Bluetooth is switched off.
    PoweredOff,
    /// Bluetooth is on and usable.
    PoweredOn,
}

impl AdapterState {
    /// Only a powered-on adapter can scan or connect.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::PoweredOn)
    }
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Resetting => write!(f, "Resetting"),
            Self::Unsupported => write!(f, "Unsupported"),
            Self::Unauthorized => write!(f, "Unauthorized"),
            Self::PoweredOff => write!(f, "Powered off"),
            Self::PoweredOn => write!(f, "Powered on"),
        }
    }
}

impl From<btleplug::api::CentralState> for AdapterState {
    fn from(state: btleplug::api::CentralState) -> Self {
        use btleplug::api::CentralState;

        match state {
            CentralState::PoweredOn => Self::PoweredOn,
            CentralState::PoweredOff => Self::PoweredOff,
            #[allow(unreachable_patterns)]
            _ => Self::Unknown,
        }
    }
}

/// Which services or characteristics a discovery request should return.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DiscoveryScope {
    /// Everything the peripheral exposes.
    #[default]
    All,
    /// Only the listed UUIDs.
    Only(Vec<Uuid>),
}

impl DiscoveryScope {
    /// Whether `uuid` falls inside this scope.
    pub fn includes(&self, uuid: &Uuid) -> bool {
        match self {
            Self::All => true,
            Self::Only(uuids) => uuids.contains(uuid),
        }
    }
}

/// Requests the session controller issues to the platform BLE stack.
///
/// Implementations must deliver results through a single serialized event
/// channel, in the order connection → services → characteristics → values
/// for a given peripheral.
#[cfg_attr(test, mockall::automock)]
pub trait RadioAdapter: Send + Sync {
    /// Current power state of the radio.
    fn state(&self) -> AdapterState;

    /// Start scanning, optionally restricted to peripherals advertising `services`.
    fn start_scan(&self, services: &[Uuid]) -> Result<()>;

    /// Stop scanning.
    fn stop_scan(&self) -> Result<()>;

    /// Request a link to a previously observed peripheral.
    fn connect(&self, peripheral: &PeripheralId) -> Result<()>;

    /// Tear down the link to a peripheral.
    fn disconnect(&self, peripheral: &PeripheralId) -> Result<()>;

    /// Request service discovery on a connected peripheral.
    fn discover_services(&self, peripheral: &PeripheralId, scope: DiscoveryScope) -> Result<()>;

    /// Request characteristic discovery for one service.
    fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: &ServiceDescriptor,
        scope: DiscoveryScope,
    ) -> Result<()>;

    /// Enable or disable value-change notifications.
    fn set_notify(
        &self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicDescriptor,
        enabled: bool,
    ) -> Result<()>;

    /// Write a value to a characteristic.
    fn write(
        &self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicDescriptor,
        data: Bytes,
        kind: WriteKind,
    ) -> Result<()>;
}
