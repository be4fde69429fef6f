//! BLE communication module.
//!
//! This module provides the radio-facing side of the crate: identifiers,
//! GATT descriptors, the [`RadioAdapter`] seam and its btleplug backend.

pub mod adapter;
pub mod btleplug_adapter;
pub mod events;
pub mod gatt;
pub mod peripheral;
pub mod uuids;

pub use adapter::{AdapterState, DiscoveryScope, RadioAdapter};
pub use btleplug_adapter::BtleplugAdapter;
pub use events::{AdapterDelegate, AdapterEvent, AdapterResult};
pub use gatt::{CharacteristicDescriptor, CharacteristicProperties, ServiceDescriptor, WriteKind};
pub use peripheral::{PeripheralHandle, PeripheralId};
pub use uuids::*;
