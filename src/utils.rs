//! Utility functions for the ble-communicator crate.

/// Render bytes as uppercase hexadecimal with no separators.
///
/// # Example
///
/// ```
/// use ble_communicator::hex_upper;
///
/// assert_eq!(hex_upper(&[0x0A, 0xFF, 0x10]), "0AFF10");
/// ```
#[inline]
pub fn hex_upper(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Decode a characteristic payload for display.
///
/// Valid UTF-8 is returned as text, anything else falls back to
/// [`hex_upper`]. Decoding never fails.
///
/// # Example
///
/// ```
/// use ble_communicator::decode_value;
///
/// assert_eq!(decode_value(b"72 bpm"), "72 bpm");
/// assert_eq!(decode_value(&[0xC3, 0x28]), "C328");
/// ```
pub fn decode_value(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(text) => text.to_string(),
        Err(_) => hex_upper(data),
    }
}
