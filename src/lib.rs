// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # ble-communicator
//!
//! A cross-platform BLE central that finds a peripheral (typically an
//! Android phone publishing a Heart Rate style GATT server), connects to
//! it, subscribes to its notifications and sends text back.
//!
//! ## Features
//!
//! - **Discovery**: Scan for peripherals, deduplicated by identifier
//! - **Connection lifecycle**: Explicit Idle/Scanning/Connecting/Connected/Disconnecting states
//! - **GATT discovery**: Fixed target profile or capability-driven discovery
//! - **Notifications**: Auto-subscribe and decode incoming values as text or hex
//! - **Messaging**: Send UTF-8 text over the detected write channel
//! - **Snapshots**: Observe every change as an immutable [`SessionSnapshot`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ble_communicator::{
//!     BtleplugAdapter, PeripheralId, Result, Session, SessionController, HEART_RATE_SERVICE,
//! };
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (events_tx, events_rx) = mpsc::unbounded_channel();
//!     let adapter = BtleplugAdapter::new(events_tx).await?;
//!     let session = Session::spawn(SessionController::new(adapter), events_rx);
//!
//!     session.start_scan()?;
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!
//!     let target: Option<PeripheralId> = session
//!         .snapshot()
//!         .peripherals
//!         .iter()
//!         .find(|p| p.advertises(HEART_RATE_SERVICE))
//!         .map(|p| p.id.clone());
//!
//!     if let Some(id) = target {
//!         session.connect(&id)?;
//!     }
//!
//!     let mut changes = session.subscribe_snapshots();
//!     while let Ok(snapshot) = changes.recv().await {
//!         println!("{}: {}", snapshot.state, snapshot.status);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod error;
pub mod session;
pub mod utils;

// Re-exports for convenience
pub use config::{AutoAction, DiscoveryStrategy, DuplicatePolicy, SessionConfig, TargetProfile};
pub use error::{AdapterError, AdapterErrorKind, Error, Result};
pub use session::{
    CallbackHandle, ConnectedSession, ReceivedValue, Session, SessionController,
    SessionSnapshot, SessionState, SessionStateKind,
};
pub use utils::{decode_value, hex_upper};

// Re-export commonly used types from submodules
pub use ble::adapter::{AdapterState, DiscoveryScope, RadioAdapter};
pub use ble::btleplug_adapter::BtleplugAdapter;
pub use ble::events::{AdapterDelegate, AdapterEvent};
pub use ble::gatt::{
    CharacteristicDescriptor, CharacteristicProperties, ServiceDescriptor, WriteKind,
};
pub use ble::peripheral::{PeripheralHandle, PeripheralId};
pub use ble::uuids::{
    HEART_RATE_CONTROL_POINT, HEART_RATE_CONTROL_POINT_UUID, HEART_RATE_MEASUREMENT,
    HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE, HEART_RATE_SERVICE_UUID,
};
