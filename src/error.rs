//! Error types for the ble-communicator crate.

use thiserror::Error;

use crate::ble::adapter::AdapterState;

/// The main error type for this crate.
///
/// Commands on the session controller are fire-and-forget: an `Err` only
/// tells the caller that the command was ignored, the session state is
/// left exactly as it was.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The radio adapter is not powered on and cannot scan.
    #[error("Radio adapter not ready: {state}")]
    AdapterNotReady {
        /// The state the adapter reported.
        state: AdapterState,
    },

    /// The specified peripheral has not been discovered.
    #[error("Peripheral not found: {identifier}")]
    PeripheralNotFound {
        /// The identifier that was searched for.
        identifier: String,
    },

    /// Operation requires a connection but no peripheral is connected.
    #[error("Peripheral not connected")]
    NotConnected,

    /// The command is not valid in the current session state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// The command that was attempted.
        operation: &'static str,
        /// The session state at the time.
        state: String,
    },

    /// Characteristic not found on the connected peripheral.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// The characteristic does not support notifications.
    #[error("Characteristic does not support notifications: {uuid}")]
    NotNotifiable {
        /// The UUID of the characteristic.
        uuid: String,
    },

    /// No writable characteristic has been recorded for this session.
    #[error("No write channel available")]
    NoWriteChannel,

    /// A failure reported asynchronously by the radio adapter.
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Category of an asynchronous adapter failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdapterErrorKind {
    /// Establishing or tearing down the link failed.
    Connection,
    /// Service or characteristic discovery failed.
    Discovery,
    /// Reading a characteristic value failed.
    Read,
    /// Writing a characteristic value failed.
    Write,
    /// Changing the notification flag failed.
    Notify,
}

impl std::fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Discovery => write!(f, "discovery"),
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Notify => write!(f, "notify"),
        }
    }
}

/// Error carried inside adapter events.
///
/// Unlike [`Error`] this is cheap to clone so it can travel through event
/// channels and be kept in session snapshots.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[error("{kind} failed: {message}")]
pub struct AdapterError {
    /// What kind of operation failed.
    pub kind: AdapterErrorKind,
    /// Description from the platform stack.
    pub message: String,
}

impl AdapterError {
    /// Create a new adapter error.
    pub fn new(kind: AdapterErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build an adapter error from a btleplug failure.
    pub fn from_btleplug(kind: AdapterErrorKind, error: &btleplug::Error) -> Self {
        Self::new(kind, error.to_string())
    }
}
