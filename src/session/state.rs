//! Session state and observable snapshots.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::ble::gatt::{CharacteristicDescriptor, ServiceDescriptor};
use crate::ble::peripheral::{PeripheralHandle, PeripheralId};
use crate::error::AdapterError;
use crate::utils::decode_value;

/// The most recent payload observed on a characteristic.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReceivedValue {
    /// Raw bytes as delivered.
    pub raw: Bytes,
    /// UTF-8 text, or uppercase hex when the bytes are not valid UTF-8.
    pub text: String,
    /// When the value arrived.
    pub received_at: DateTime<Utc>,
}

impl ReceivedValue {
    /// Decode a payload.
    pub fn new(raw: Bytes) -> Self {
        let text = decode_value(&raw);
        Self {
            raw,
            text,
            received_at: Utc::now(),
        }
    }
}

/// Everything the session knows about the connected peripheral.
///
/// Dropped as a whole when the link goes down.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectedSession {
    /// The connected peripheral.
    pub peripheral: PeripheralHandle,
    /// Discovered services.
    pub services: Vec<ServiceDescriptor>,
    /// Discovered characteristics, in discovery order.
    pub characteristics: Vec<CharacteristicDescriptor>,
    /// Characteristics with notifications enabled.
    pub subscriptions: BTreeSet<Uuid>,
    /// Last received value per characteristic.
    pub values: HashMap<Uuid, ReceivedValue>,
    /// Characteristic used for outbound messages.
    pub write_channel: Option<CharacteristicDescriptor>,
}

impl ConnectedSession {
    pub(crate) fn new(peripheral: PeripheralHandle) -> Self {
        Self {
            peripheral,
            services: Vec::new(),
            characteristics: Vec::new(),
            subscriptions: BTreeSet::new(),
            values: HashMap::new(),
            write_channel: None,
        }
    }

    /// Look up a discovered characteristic.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicDescriptor> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }

    /// Whether outbound messages can be sent.
    pub fn can_send(&self) -> bool {
        self.write_channel.is_some()
    }
}

/// Connection lifecycle state of the session.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    /// No link and no scan.
    #[default]
    Idle,
    /// No link, scanning for peripherals.
    Scanning,
    /// Waiting for the adapter to establish a link.
    Connecting {
        /// The requested peripheral.
        target: PeripheralHandle,
    },
    /// Linked to a peripheral.
    Connected(Box<ConnectedSession>),
    /// Waiting for the adapter to report the link is down.
    Disconnecting {
        /// The peripheral being released.
        peripheral: PeripheralId,
    },
}

impl SessionState {
    /// The state without its payload.
    pub fn kind(&self) -> SessionStateKind {
        match self {
            Self::Idle => SessionStateKind::Idle,
            Self::Scanning => SessionStateKind::Scanning,
            Self::Connecting { .. } => SessionStateKind::Connecting,
            Self::Connected(_) => SessionStateKind::Connected,
            Self::Disconnecting { .. } => SessionStateKind::Disconnecting,
        }
    }

    /// The connected session, only present while connected.
    pub fn connected(&self) -> Option<&ConnectedSession> {
        match self {
            Self::Connected(session) => Some(session),
            _ => None,
        }
    }

    pub(crate) fn connected_mut(&mut self) -> Option<&mut ConnectedSession> {
        match self {
            Self::Connected(session) => Some(session),
            _ => None,
        }
    }

    /// The peripheral the current link (or link attempt) is for.
    pub fn link_peripheral(&self) -> Option<&PeripheralId> {
        match self {
            Self::Connecting { target } => Some(&target.id),
            Self::Connected(session) => Some(&session.peripheral.id),
            Self::Disconnecting { peripheral } => Some(peripheral),
            Self::Idle | Self::Scanning => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind())
    }
}

/// Payload-free session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionStateKind {
    /// No link and no scan.
    #[default]
    Idle,
    /// Scanning.
    Scanning,
    /// Link requested.
    Connecting,
    /// Linked.
    Connected,
    /// Link teardown requested.
    Disconnecting,
}

impl SessionStateKind {
    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

impl std::fmt::Display for SessionStateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Read-only copy of everything a presentation layer may display.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionSnapshot {
    /// Lifecycle state.
    pub state: SessionStateKind,
    /// Discovered peripherals in first-seen order.
    pub peripherals: Vec<PeripheralHandle>,
    /// Detail record per peripheral identifier.
    pub details: HashMap<PeripheralId, String>,
    /// Whether the radio is scanning.
    pub is_scanning: bool,
    /// The connected peripheral.
    pub connected: Option<PeripheralHandle>,
    /// Services of the connected peripheral.
    pub services: Vec<ServiceDescriptor>,
    /// Characteristics of the connected peripheral.
    pub characteristics: Vec<CharacteristicDescriptor>,
    /// Last received value per characteristic.
    pub values: HashMap<Uuid, ReceivedValue>,
    /// Subscribed characteristics.
    pub subscriptions: BTreeSet<Uuid>,
    /// Whether a write channel is available.
    pub can_send: bool,
    /// Free text for direct display.
    pub status: String,
    /// Most recent adapter failure.
    pub last_error: Option<AdapterError>,
}

impl SessionSnapshot {
    /// Characteristics belonging to one service.
    pub fn characteristics_of(&self, service: &Uuid) -> Vec<&CharacteristicDescriptor> {
        self.characteristics
            .iter()
            .filter(|c| c.service_uuid == *service)
            .collect()
    }

    /// Display text of the last value received on a characteristic.
    pub fn value_text(&self, characteristic: &Uuid) -> Option<&str> {
        self.values.get(characteristic).map(|v| v.text.as_str())
    }
}
