//! BLE Service and Characteristic UUIDs.
//!
//! Contains the well-known identifiers published by the Android peripheral
//! and helpers for matching short (16/32-bit) identifiers against full UUIDs.

use uuid::Uuid;

/// The Bluetooth Base UUID (`00000000-0000-1000-8000-00805F9B34FB`).
pub const BLUETOOTH_BASE_UUID: Uuid = Uuid::from_u128(0x0000_0000_0000_1000_8000_00805f9b34fb);

const BASE_LOW_BITS: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;
const BASE_LOW_MASK: u128 = (1u128 << 96) - 1;

// Heart Rate Service (Standard BLE, published by the Android peripheral)
/// Heart Rate Service UUID.
pub const HEART_RATE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180d_0000_1000_8000_00805f9b34fb);
/// Heart Rate Measurement characteristic UUID (Read, Notify).
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a37_0000_1000_8000_00805f9b34fb);
/// Heart Rate Control Point characteristic UUID (Write).
pub const HEART_RATE_CONTROL_POINT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a38_0000_1000_8000_00805f9b34fb);

/// Short identifier of the heart rate service.
pub const HEART_RATE_SERVICE: &str = "180D";
/// Short identifier of the notify characteristic.
pub const HEART_RATE_MEASUREMENT: &str = "2A37";
/// Short identifier of the write characteristic.
pub const HEART_RATE_CONTROL_POINT: &str = "2A38";

/// Expand a 16-bit or 32-bit assigned number into a full UUID.
pub const fn from_short(short: u32) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | BASE_LOW_BITS)
}

/// Return the assigned number if the UUID lies in the Bluetooth base range.
pub fn short_form(uuid: &Uuid) -> Option<u32> {
    let value = uuid.as_u128();
    if value & BASE_LOW_MASK == BASE_LOW_BITS {
        Some((value >> 96) as u32)
    } else {
        None
    }
}

/// Render a UUID the way platform stacks usually display it.
///
/// Assigned numbers collapse to 4 (or 8) uppercase hex digits, anything
/// else is the full uppercase hyphenated form.
pub fn display_id(uuid: &Uuid) -> String {
    match short_form(uuid) {
        Some(short) if short <= 0xFFFF => format!("{:04X}", short),
        Some(short) => format!("{:08X}", short),
        None => uuid.hyphenated().to_string().to_uppercase(),
    }
}

/// Exact-suffix match of a discovered identifier against a configured target.
///
/// The target may be a short id (`"180D"`) or a full UUID string; the
/// comparison is case-insensitive and checked against both the short and
/// full renderings.
pub fn matches_suffix(uuid: &Uuid, target: &str) -> bool {
    let target = target.trim().to_uppercase();
    if target.is_empty() {
        return false;
    }

    display_id(uuid).ends_with(&target)
        || uuid
            .hyphenated()
            .to_string()
            .to_uppercase()
            .ends_with(&target)
}

/// Parse a configured identifier into a full UUID.
///
/// Short hex ids are expanded against the base UUID.
pub fn parse_id(id: &str) -> Option<Uuid> {
    let id = id.trim();
    if id.len() <= 8 {
        return u32::from_str_radix(id, 16).ok().map(from_short);
    }
    Uuid::parse_str(id).ok()
}
