//! GATT service and characteristic descriptors.
//!
//! These are platform independent copies of what the radio adapter reports
//! after discovery. They are owned by the session and dropped on disconnect.

use btleplug::api::{CharPropFlags, Characteristic, Service};
use uuid::Uuid;

/// A GATT service exposed by the connected peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceDescriptor {
    /// Service UUID.
    pub uuid: Uuid,
    /// Whether this is a primary service.
    pub primary: bool,
}

impl ServiceDescriptor {
    /// Create a primary service descriptor.
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            primary: true,
        }
    }
}

impl From<&Service> for ServiceDescriptor {
    fn from(service: &Service) -> Self {
        Self {
            uuid: service.uuid,
            primary: service.primary,
        }
    }
}

/// Capability flags of a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicProperties {
    /// Value can be read.
    pub read: bool,
    /// Value can be written with a response.
    pub write: bool,
    /// Value can be written without a response.
    pub write_without_response: bool,
    /// Value changes can be notified.
    pub notify: bool,
    /// Value changes can be indicated.
    pub indicate: bool,
}

impl CharacteristicProperties {
    /// Readable and notifiable, like a measurement characteristic.
    pub const NOTIFY: Self = Self {
        read: true,
        write: false,
        write_without_response: false,
        notify: true,
        indicate: false,
    };

    /// Writable with response only.
    pub const WRITE: Self = Self {
        read: false,
        write: true,
        write_without_response: false,
        notify: false,
        indicate: false,
    };
}

impl From<CharPropFlags> for CharacteristicProperties {
    fn from(flags: CharPropFlags) -> Self {
        Self {
            read: flags.contains(CharPropFlags::READ),
            write: flags.contains(CharPropFlags::WRITE),
            write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
            notify: flags.contains(CharPropFlags::NOTIFY),
            indicate: flags.contains(CharPropFlags::INDICATE),
        }
    }
}

/// How a value is written to a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WriteKind {
    /// The peripheral acknowledges the write.
    WithResponse,
    /// Fire and forget.
    WithoutResponse,
}

impl From<WriteKind> for btleplug::api::WriteType {
    fn from(kind: WriteKind) -> Self {
        match kind {
            WriteKind::WithResponse => Self::WithResponse,
            WriteKind::WithoutResponse => Self::WithoutResponse,
        }
    }
}

/// A GATT characteristic discovered on the connected peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicDescriptor {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the owning service.
    pub service_uuid: Uuid,
    /// Capability flags.
    pub properties: CharacteristicProperties,
}

impl CharacteristicDescriptor {
    /// Create a characteristic descriptor.
    pub fn new(uuid: Uuid, service_uuid: Uuid, properties: CharacteristicProperties) -> Self {
        Self {
            uuid,
            service_uuid,
            properties,
        }
    }

    /// Whether value changes can be pushed to the central.
    pub fn is_notifiable(&self) -> bool {
        self.properties.notify || self.properties.indicate
    }

    /// Whether the characteristic accepts writes of either kind.
    pub fn is_writable(&self) -> bool {
        self.properties.write || self.properties.write_without_response
    }

    /// Preferred write kind, favouring acknowledged writes.
    pub fn write_kind(&self) -> Option<WriteKind> {
        if self.properties.write {
            Some(WriteKind::WithResponse)
        } else if self.properties.write_without_response {
            Some(WriteKind::WithoutResponse)
        } else {
            None
        }
    }
}

impl From<&Characteristic> for CharacteristicDescriptor {
    fn from(characteristic: &Characteristic) -> Self {
        Self {
            uuid: characteristic.uuid,
            service_uuid: characteristic.service_uuid,
            properties: characteristic.properties.into(),
        }
    }
}
