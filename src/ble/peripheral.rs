//! Discovered peripheral records.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Write as _;
use uuid::Uuid;

use crate::ble::uuids::{display_id, matches_suffix};
use crate::utils::hex_upper;

/// Stable identity of a discoverable peripheral.
///
/// On Apple platforms this is the CoreBluetooth UUID, on BlueZ the device
/// path and on Windows the Bluetooth address; the crate treats it as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Create an identifier from its platform string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The platform identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeripheralId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<Uuid> for PeripheralId {
    fn from(id: Uuid) -> Self {
        Self(id.hyphenated().to_string().to_uppercase())
    }
}

/// A peripheral observed during scanning.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralHandle {
    /// Stable identity.
    pub id: PeripheralId,
    /// GAP device name, if known.
    pub name: Option<String>,
    /// Local name from the advertisement, if present.
    pub local_name: Option<String>,
    /// Last observed signal strength in dBm.
    pub rssi: Option<i16>,
    /// Service UUIDs listed in the advertisement.
    pub services: Vec<Uuid>,
    /// Manufacturer specific data keyed by company id.
    pub manufacturer_data: HashMap<u16, Bytes>,
    /// When the peripheral was last observed.
    pub last_seen: DateTime<Utc>,
}

impl PeripheralHandle {
    /// Create a handle with only an identity.
    pub fn new(id: impl Into<PeripheralId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            local_name: None,
            rssi: None,
            services: Vec::new(),
            manufacturer_data: HashMap::new(),
            last_seen: Utc::now(),
        }
    }

    /// Set the device name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the signal strength.
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Add an advertised service.
    pub fn with_service(mut self, service: Uuid) -> Self {
        self.services.push(service);
        self
    }

    /// Best name for display, falling back to the advertised local name.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.local_name.as_deref())
    }

    /// Whether the advertisement lists a service matching `target`.
    pub fn advertises(&self, target: &str) -> bool {
        self.services.iter().any(|uuid| matches_suffix(uuid, target))
    }

    /// Take the refreshable fields of a newer observation of the same peripheral.
    ///
    /// Advertisements are often split across packets, so fields missing from
    /// the newer observation keep their previous value.
    pub(crate) fn refresh_from(&mut self, newer: &PeripheralHandle) {
        if newer.rssi.is_some() {
            self.rssi = newer.rssi;
        }
        if newer.name.is_some() {
            self.name.clone_from(&newer.name);
        }
        if newer.local_name.is_some() {
            self.local_name.clone_from(&newer.local_name);
        }
        if !newer.services.is_empty() {
            self.services.clone_from(&newer.services);
        }
        for (company, data) in &newer.manufacturer_data {
            self.manufacturer_data.insert(*company, data.clone());
        }
        self.last_seen = newer.last_seen;
    }

    /// Human readable detail record.
    ///
    /// Advertised services matching `target_service` are marked.
    pub fn details(&self, target_service: Option<&str>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Name: {}", self.name.as_deref().unwrap_or("Unknown"));
        let _ = writeln!(out, "Identifier: {}", self.id);
        match self.rssi {
            Some(rssi) => {
                let _ = writeln!(out, "RSSI: {} dBm", rssi);
            }
            None => {
                let _ = writeln!(out, "RSSI: unknown");
            }
        }

        if !self.manufacturer_data.is_empty() {
            let mut companies: Vec<_> = self.manufacturer_data.iter().collect();
            companies.sort_by_key(|(company, _)| **company);
            for (company, data) in companies {
                let _ = writeln!(
                    out,
                    "Manufacturer data ({:04X}): {}",
                    company,
                    hex_upper(data)
                );
            }
        }

        if !self.services.is_empty() {
            let _ = writeln!(out, "Services:");
            for uuid in &self.services {
                let _ = writeln!(out, "- {}", display_id(uuid));
                if target_service.is_some_and(|target| matches_suffix(uuid, target)) {
                    let _ = writeln!(out, "  * target service");
                }
            }
        }

        if let Some(local_name) = &self.local_name {
            let _ = writeln!(out, "Local name: {}", local_name);
        }

        out
    }
}
