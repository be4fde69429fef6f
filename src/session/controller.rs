//! BLE session controller.
//!
//! Drives a [`RadioAdapter`] through scan → connect → discover → subscribe /
//! write → disconnect and keeps the observable session state. Commands are
//! fire-and-forget: they issue adapter requests and return, and their
//! effects are applied when the matching [`AdapterEvent`] arrives.

use bytes::Bytes;
use std::collections::HashMap;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::adapter::{AdapterState, RadioAdapter};
use crate::ble::events::{AdapterDelegate, AdapterEvent, AdapterResult};
use crate::ble::gatt::{CharacteristicDescriptor, ServiceDescriptor, WriteKind};
use crate::ble::peripheral::{PeripheralHandle, PeripheralId};
use crate::ble::uuids::display_id;
use crate::config::{DuplicatePolicy, SessionConfig};
use crate::error::{AdapterError, Error, Result};
use crate::session::state::{
    ConnectedSession, ReceivedValue, SessionSnapshot, SessionState,
};

/// Status text shown before anything has happened.
pub const INITIAL_STATUS: &str = "Waiting for data...";

/// State machine for a single outbound BLE connection.
pub struct SessionController<A: RadioAdapter> {
    /// Platform radio.
    adapter: A,
    /// Session configuration.
    config: SessionConfig,
    /// Last radio state reported through events.
    adapter_state: AdapterState,
    /// Lifecycle state, including the connected session.
    state: SessionState,
    /// Whether the radio has been asked to scan.
    is_scanning: bool,
    /// Discovered peripherals in first-seen order.
    peripherals: Vec<PeripheralHandle>,
    /// Detail record per peripheral.
    details: HashMap<PeripheralId, String>,
    /// Free text for display.
    status: String,
    /// Most recent adapter failure.
    last_error: Option<AdapterError>,
    /// Bumped on every observable change.
    revision: u64,
}

impl<A: RadioAdapter> SessionController<A> {
    /// Create a controller with the default heart-rate configuration.
    pub fn new(adapter: A) -> Self {
        Self::with_config(adapter, SessionConfig::default())
    }

    /// Create a controller with a custom configuration.
    pub fn with_config(adapter: A, config: SessionConfig) -> Self {
        Self {
            adapter,
            config,
            adapter_state: AdapterState::Unknown,
            state: SessionState::Idle,
            is_scanning: false,
            peripherals: Vec::new(),
            details: HashMap::new(),
            status: INITIAL_STATUS.to_string(),
            last_error: None,
            revision: 0,
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Start scanning for peripherals.
    ///
    /// Ignored unless the adapter reports it is powered on.
    pub fn start_scan(&mut self) -> Result<()> {
        let adapter_state = self.adapter.state();
        if !adapter_state.is_ready() {
            warn!("Cannot scan, radio adapter is {}", adapter_state);
            return Err(Error::AdapterNotReady {
                state: adapter_state,
            });
        }

        if self.config.clear_on_scan {
            self.peripherals.clear();
            self.details.clear();
        }

        let filter = self.config.scan_filter();
        info!("Starting BLE scan (filter: {:?})", filter);
        self.adapter.start_scan(&filter)?;

        self.is_scanning = true;
        if matches!(self.state, SessionState::Idle) {
            self.state = SessionState::Scanning;
        }
        self.status = "Scanning...".to_string();
        self.touch();

        Ok(())
    }

    /// Stop scanning.
    pub fn stop_scan(&mut self) -> Result<()> {
        if !self.is_scanning {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        info!("Stopping BLE scan");

        if let Err(e) = self.adapter.stop_scan() {
            error!("Failed to stop scan: {}", e);
        }

        self.is_scanning = false;
        if matches!(self.state, SessionState::Scanning) {
            self.state = SessionState::Idle;
        }
        self.status = format!("Scan stopped, {} device(s) found", self.peripherals.len());
        self.touch();

        Ok(())
    }

    /// Ask the adapter to connect to a discovered peripheral.
    pub fn connect(&mut self, peripheral: &PeripheralId) -> Result<()> {
        if !matches!(self.state, SessionState::Idle | SessionState::Scanning) {
            debug!("Ignoring connect to {} while {}", peripheral, self.state);
            return Err(self.invalid_state("connect"));
        }

        let target = self
            .peripherals
            .iter()
            .find(|p| p.id == *peripheral)
            .cloned()
            .ok_or_else(|| Error::PeripheralNotFound {
                identifier: peripheral.to_string(),
            })?;

        info!(
            "Connecting to {} ({})",
            target.display_name().unwrap_or("Unknown"),
            peripheral
        );
        self.adapter.connect(peripheral)?;

        self.status = format!(
            "Connecting to {}...",
            target.display_name().unwrap_or("Unknown")
        );
        self.state = SessionState::Connecting { target };
        self.touch();

        Ok(())
    }

    /// Release all subscriptions and ask the adapter to drop the link.
    ///
    /// The session is cleared when the adapter reports the disconnection.
    pub fn disconnect(&mut self) -> Result<()> {
        let peripheral = match self.state.connected() {
            Some(session) => session.peripheral.id.clone(),
            None => {
                debug!("Ignoring disconnect while {}", self.state);
                return Err(self.invalid_state("disconnect"));
            }
        };

        self.release_subscriptions();

        info!("Disconnecting from {}", peripheral);
        self.adapter.disconnect(&peripheral)?;

        self.state = SessionState::Disconnecting { peripheral };
        self.status = "Disconnecting...".to_string();
        self.touch();

        Ok(())
    }

    /// Send text over the recorded write channel.
    pub fn send(&mut self, text: &str) -> Result<()> {
        let session = self.state.connected().ok_or(Error::NotConnected)?;
        let channel = match session.write_channel {
            Some(channel) => channel,
            None => {
                error!("Cannot send data: no write characteristic");
                return Err(Error::NoWriteChannel);
            }
        };
        let kind = channel.write_kind().unwrap_or(WriteKind::WithResponse);

        self.adapter.write(
            &session.peripheral.id,
            &channel,
            Bytes::copy_from_slice(text.as_bytes()),
            kind,
        )?;

        info!("Sending data: {}", text);
        self.status = format!("Sent: {}", text);
        self.touch();

        Ok(())
    }

    /// Enable notifications on a discovered characteristic.
    pub fn subscribe(&mut self, characteristic: &Uuid) -> Result<()> {
        let session = self.state.connected_mut().ok_or(Error::NotConnected)?;
        let descriptor = session
            .characteristic(characteristic)
            .copied()
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: characteristic.to_string(),
            })?;

        if !descriptor.is_notifiable() {
            return Err(Error::NotNotifiable {
                uuid: characteristic.to_string(),
            });
        }

        if session.subscriptions.contains(characteristic) {
            debug!("Already subscribed to {}", display_id(characteristic));
            return Ok(());
        }

        self.adapter
            .set_notify(&session.peripheral.id, &descriptor, true)?;
        session.subscriptions.insert(descriptor.uuid);

        info!("Subscribed to {}", display_id(characteristic));
        self.touch();

        Ok(())
    }

    /// Disable notifications and forget the last value of a characteristic.
    pub fn unsubscribe(&mut self, characteristic: &Uuid) -> Result<()> {
        let session = self.state.connected_mut().ok_or(Error::NotConnected)?;

        let was_subscribed = session.subscriptions.remove(characteristic);
        let had_value = session.values.remove(characteristic).is_some();

        if was_subscribed {
            if let Some(descriptor) = session.characteristic(characteristic).copied() {
                if let Err(e) = self
                    .adapter
                    .set_notify(&session.peripheral.id, &descriptor, false)
                {
                    warn!("Failed to unsubscribe from {}: {}", display_id(characteristic), e);
                }
            }
            info!("Unsubscribed from {}", display_id(characteristic));
        }

        if was_subscribed || had_value {
            self.touch();
        }
        Ok(())
    }

    /// Disable notifications on every subscribed characteristic.
    pub fn unsubscribe_all(&mut self) -> Result<()> {
        if self.state.connected().is_none() {
            return Err(Error::NotConnected);
        }

        if self.release_subscriptions() {
            self.touch();
        }
        Ok(())
    }

    /// Feed one adapter event into the state machine.
    pub fn handle_event(&mut self, event: AdapterEvent) {
        trace!("Adapter event: {}", event.name());
        event.dispatch(self);
    }

    // ------------------------------------------------------------------
    // Observable state
    // ------------------------------------------------------------------

    /// Current lifecycle state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Whether the radio is scanning.
    pub fn is_scanning(&self) -> bool {
        self.is_scanning
    }

    /// Discovered peripherals in first-seen order.
    pub fn peripherals(&self) -> &[PeripheralHandle] {
        &self.peripherals
    }

    /// Detail record of a discovered peripheral.
    pub fn peripheral_details(&self, peripheral: &PeripheralId) -> Option<&str> {
        self.details.get(peripheral).map(String::as_str)
    }

    /// The connected peripheral, present only while connected.
    pub fn connected_peripheral(&self) -> Option<&PeripheralHandle> {
        self.state.connected().map(|s| &s.peripheral)
    }

    /// Services of the connected peripheral.
    pub fn services(&self) -> &[ServiceDescriptor] {
        self.state
            .connected()
            .map(|s| s.services.as_slice())
            .unwrap_or_default()
    }

    /// Characteristics of the connected peripheral.
    pub fn characteristics(&self) -> &[CharacteristicDescriptor] {
        self.state
            .connected()
            .map(|s| s.characteristics.as_slice())
            .unwrap_or_default()
    }

    /// Whether `characteristic` is subscribed.
    pub fn is_subscribed(&self, characteristic: &Uuid) -> bool {
        self.state
            .connected()
            .is_some_and(|s| s.subscriptions.contains(characteristic))
    }

    /// Last value received on a characteristic.
    pub fn value(&self, characteristic: &Uuid) -> Option<&ReceivedValue> {
        self.state
            .connected()
            .and_then(|s| s.values.get(characteristic))
    }

    /// Whether a write channel has been recorded.
    pub fn can_send(&self) -> bool {
        self.state.connected().is_some_and(ConnectedSession::can_send)
    }

    /// Free text for display.
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Most recent adapter failure.
    pub fn last_error(&self) -> Option<&AdapterError> {
        self.last_error.as_ref()
    }

    /// Last radio state reported by the adapter.
    pub fn adapter_state(&self) -> AdapterState {
        self.adapter_state
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The radio adapter.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Change counter, bumped on every observable change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Copy of the observable state.
    pub fn snapshot(&self) -> SessionSnapshot {
        let connected = self.state.connected();
        SessionSnapshot {
            state: self.state.kind(),
            peripherals: self.peripherals.clone(),
            details: self.details.clone(),
            is_scanning: self.is_scanning,
            connected: connected.map(|s| s.peripheral.clone()),
            services: connected.map(|s| s.services.clone()).unwrap_or_default(),
            characteristics: connected
                .map(|s| s.characteristics.clone())
                .unwrap_or_default(),
            values: connected.map(|s| s.values.clone()).unwrap_or_default(),
            subscriptions: connected
                .map(|s| s.subscriptions.clone())
                .unwrap_or_default(),
            can_send: connected.is_some_and(ConnectedSession::can_send),
            status: self.status.clone(),
            last_error: self.last_error.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    fn invalid_state(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    /// State to fall back to once the link is gone.
    fn unlinked_state(&self) -> SessionState {
        if self.is_scanning {
            SessionState::Scanning
        } else {
            SessionState::Idle
        }
    }

    /// Best-effort unsubscribe of every tracked characteristic.
    ///
    /// Returns whether anything was released.
    fn release_subscriptions(&mut self) -> bool {
        let Some(session) = self.state.connected_mut() else {
            return false;
        };

        let subscribed = std::mem::take(&mut session.subscriptions);
        let released = !subscribed.is_empty();
        for uuid in subscribed {
            session.values.remove(&uuid);
            let Some(descriptor) = session.characteristic(&uuid).copied() else {
                continue;
            };
            match self
                .adapter
                .set_notify(&session.peripheral.id, &descriptor, false)
            {
                Ok(()) => debug!("Unsubscribed from {}", display_id(&uuid)),
                Err(e) => warn!("Failed to unsubscribe from {}: {}", display_id(&uuid), e),
            }
        }
        released
    }

    /// Whether the session is linked and connected to `peripheral`.
    fn is_connected_to(&self, peripheral: &PeripheralId) -> bool {
        self.state
            .connected()
            .is_some_and(|s| s.peripheral.id == *peripheral)
    }

    fn record_error(&mut self, error: AdapterError) {
        error!("{}", error);
        self.status = error.to_string();
        self.last_error = Some(error);
        self.touch();
    }
}

/// The connected session if it belongs to `peripheral`.
fn session_for<'a>(
    state: &'a mut SessionState,
    peripheral: &PeripheralId,
) -> Option<&'a mut ConnectedSession> {
    match state {
        SessionState::Connected(session) if session.peripheral.id == *peripheral => Some(session),
        _ => None,
    }
}

impl<A: RadioAdapter> AdapterDelegate for SessionController<A> {
    fn on_state_changed(&mut self, state: AdapterState) {
        match state {
            AdapterState::PoweredOn => info!("Bluetooth is powered on"),
            AdapterState::PoweredOff => error!("Bluetooth is powered off"),
            AdapterState::Unsupported => error!("Bluetooth is not supported on this device"),
            AdapterState::Unauthorized => error!("Bluetooth use is not authorized"),
            AdapterState::Resetting => error!("Bluetooth is resetting"),
            AdapterState::Unknown => error!("Bluetooth state is unknown"),
        }

        self.adapter_state = state;
        if !state.is_ready() && self.is_scanning {
            self.is_scanning = false;
            if matches!(self.state, SessionState::Scanning) {
                self.state = SessionState::Idle;
            }
        }
        self.status = format!("Bluetooth: {}", state);
        self.touch();
    }

    fn on_peripheral_observed(&mut self, handle: PeripheralHandle) {
        if !self.is_scanning {
            trace!("Ignoring advertisement from {} while not scanning", handle.id);
            return;
        }

        let target = self.config.discovery.target_service();
        match self.peripherals.iter().position(|p| p.id == handle.id) {
            None => {
                let details = handle.details(target);
                info!("Discovered device:\n{}", details);
                self.details.insert(handle.id.clone(), details);
                self.peripherals.push(handle);
            }
            Some(index) => match self.config.duplicates {
                DuplicatePolicy::Ignore => {
                    trace!("Ignoring repeated advertisement from {}", handle.id);
                    return;
                }
                DuplicatePolicy::RefreshSignal => {
                    trace!("Refreshing {} (RSSI {:?})", handle.id, handle.rssi);
                    let known = &mut self.peripherals[index];
                    known.refresh_from(&handle);
                    let details = known.details(target);
                    self.details.insert(handle.id, details);
                }
            },
        }

        self.touch();
    }

    fn on_connected(&mut self, peripheral: PeripheralId) {
        let target = match &self.state {
            SessionState::Connecting { target } if target.id == peripheral => target.clone(),
            SessionState::Connected(session) if session.peripheral.id == peripheral => {
                debug!("Already connected to {}", peripheral);
                return;
            }
            _ => {
                warn!(
                    "Ignoring unexpected connection to {} while {}",
                    peripheral, self.state
                );
                return;
            }
        };

        info!(
            "Connected to {}",
            target.display_name().unwrap_or("Unknown")
        );
        self.status = format!("Connected to {}", target.display_name().unwrap_or("Unknown"));
        self.state = SessionState::Connected(Box::new(ConnectedSession::new(target)));
        self.touch();

        let scope = self.config.discovery.service_scope();
        if let Err(e) = self.adapter.discover_services(&peripheral, scope) {
            warn!("Failed to request service discovery: {}", e);
        }
    }

    fn on_connection_failed(&mut self, peripheral: PeripheralId, error: AdapterError) {
        if !matches!(&self.state, SessionState::Connecting { target } if target.id == peripheral) {
            debug!("Ignoring connection failure for {}", peripheral);
            return;
        }

        self.state = self.unlinked_state();
        self.record_error(error);
    }

    fn on_disconnected(&mut self, peripheral: PeripheralId, error: Option<AdapterError>) {
        if self.state.link_peripheral() != Some(&peripheral) {
            debug!("Ignoring disconnect of {}", peripheral);
            return;
        }

        self.state = SessionState::Idle;
        match error {
            Some(error) => {
                error!("Device disconnected with error: {}", error.message);
                self.status = format!("Disconnected: {}", error.message);
                self.last_error = Some(error);
            }
            None => {
                info!("Device disconnected");
                self.status = "Disconnected".to_string();
            }
        }
        self.touch();
    }

    fn on_services_discovered(
        &mut self,
        peripheral: PeripheralId,
        result: AdapterResult<Vec<ServiceDescriptor>>,
    ) {
        let services = match result {
            Ok(services) => services,
            Err(e) => {
                if self.is_connected_to(&peripheral) {
                    self.record_error(e);
                } else {
                    debug!("Ignoring failure for {}: {}", peripheral, e);
                }
                return;
            }
        };

        let Some(session) = session_for(&mut self.state, &peripheral) else {
            debug!("Ignoring services for {}", peripheral);
            return;
        };

        session.services = services;
        let scope = self.config.discovery.characteristic_scope();
        for service in &session.services {
            if !self.config.discovery.wants_service(service) {
                continue;
            }
            if self.config.discovery.is_target_service(&service.uuid) {
                info!("Found target service: {}", display_id(&service.uuid));
            }
            if let Err(e) = self
                .adapter
                .discover_characteristics(&peripheral, service, scope.clone())
            {
                warn!(
                    "Failed to request characteristics of {}: {}",
                    display_id(&service.uuid),
                    e
                );
            }
        }

        self.touch();
    }

    fn on_characteristics_discovered(
        &mut self,
        peripheral: PeripheralId,
        service: ServiceDescriptor,
        result: AdapterResult<Vec<CharacteristicDescriptor>>,
    ) {
        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(e) => {
                if self.is_connected_to(&peripheral) {
                    self.record_error(e);
                } else {
                    debug!("Ignoring failure for {}: {}", peripheral, e);
                }
                return;
            }
        };

        let Some(session) = session_for(&mut self.state, &peripheral) else {
            debug!("Ignoring characteristics for {}", peripheral);
            return;
        };

        for characteristic in characteristics {
            info!(
                "Found characteristic {} in service {}",
                display_id(&characteristic.uuid),
                display_id(&service.uuid)
            );
            if session.characteristic(&characteristic.uuid).is_none() {
                session.characteristics.push(characteristic);
            }

            let action = self.config.discovery.classify(&characteristic);

            if action.subscribe && !session.subscriptions.contains(&characteristic.uuid) {
                match self
                    .adapter
                    .set_notify(&peripheral, &characteristic, true)
                {
                    Ok(()) => {
                        info!(
                            "Subscribing to notify characteristic {}",
                            display_id(&characteristic.uuid)
                        );
                        session.subscriptions.insert(characteristic.uuid);
                    }
                    Err(e) => warn!(
                        "Failed to subscribe to {}: {}",
                        display_id(&characteristic.uuid),
                        e
                    ),
                }
            }

            if action.write_channel && session.write_channel.is_none() {
                info!(
                    "Found write characteristic {}",
                    display_id(&characteristic.uuid)
                );
                session.write_channel = Some(characteristic);
            }
        }

        self.touch();
    }

    fn on_value_updated(
        &mut self,
        peripheral: PeripheralId,
        characteristic: CharacteristicDescriptor,
        result: AdapterResult<Bytes>,
    ) {
        let data = match result {
            Ok(data) => data,
            Err(e) => {
                if self.is_connected_to(&peripheral) {
                    self.record_error(e);
                } else {
                    debug!("Ignoring failure for {}: {}", peripheral, e);
                }
                return;
            }
        };

        let Some(session) = session_for(&mut self.state, &peripheral) else {
            debug!("Ignoring value from {}", peripheral);
            return;
        };

        let value = ReceivedValue::new(data);
        debug!(
            "Received data on {}: {}",
            display_id(&characteristic.uuid),
            value.text
        );
        self.status = format!("Received: {}", value.text);
        session.values.insert(characteristic.uuid, value);
        self.touch();
    }

    fn on_write_result(
        &mut self,
        peripheral: PeripheralId,
        characteristic: CharacteristicDescriptor,
        result: AdapterResult<()>,
    ) {
        match result {
            Ok(()) => debug!("Write to {} succeeded", display_id(&characteristic.uuid)),
            Err(e) if self.is_connected_to(&peripheral) => self.record_error(e),
            Err(e) => debug!("Ignoring write failure for {}: {}", peripheral, e),
        }
    }

    fn on_notification_state_changed(
        &mut self,
        peripheral: PeripheralId,
        characteristic: CharacteristicDescriptor,
        enabled: bool,
        result: AdapterResult<()>,
    ) {
        match result {
            Ok(()) => debug!(
                "Notifications {} for {}",
                if enabled { "enabled" } else { "disabled" },
                display_id(&characteristic.uuid)
            ),
            Err(e) if self.is_connected_to(&peripheral) => self.record_error(e),
            // Unsubscribes released on the way down fail once the link is gone
            Err(e) => debug!("Ignoring notify failure for {}: {}", peripheral, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::adapter::{DiscoveryScope, MockRadioAdapter};
    use crate::ble::gatt::CharacteristicProperties;
    use crate::ble::uuids::*;
    use crate::config::{DiscoveryStrategy, TargetProfile};
    use crate::error::AdapterErrorKind;
    use crate::session::state::SessionStateKind;
    use mockall::predicate::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use tokio_test::{assert_err, assert_ok};

    fn p1() -> PeripheralId {
        PeripheralId::from("P1")
    }

    fn notify_char() -> CharacteristicDescriptor {
        CharacteristicDescriptor::new(
            HEART_RATE_MEASUREMENT_UUID,
            HEART_RATE_SERVICE_UUID,
            CharacteristicProperties::NOTIFY,
        )
    }

    fn write_char() -> CharacteristicDescriptor {
        CharacteristicDescriptor::new(
            HEART_RATE_CONTROL_POINT_UUID,
            HEART_RATE_SERVICE_UUID,
            CharacteristicProperties::WRITE,
        )
    }

    fn hr_service() -> ServiceDescriptor {
        ServiceDescriptor::new(HEART_RATE_SERVICE_UUID)
    }

    /// Adapter that accepts every request.
    fn permissive_adapter() -> MockRadioAdapter {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_state().return_const(AdapterState::PoweredOn);
        adapter.expect_start_scan().returning(|_| Ok(()));
        adapter.expect_stop_scan().returning(|| Ok(()));
        adapter.expect_connect().returning(|_| Ok(()));
        adapter.expect_disconnect().returning(|_| Ok(()));
        adapter.expect_discover_services().returning(|_, _| Ok(()));
        adapter
            .expect_discover_characteristics()
            .returning(|_, _, _| Ok(()));
        adapter.expect_set_notify().returning(|_, _, _| Ok(()));
        adapter.expect_write().returning(|_, _, _, _| Ok(()));
        adapter
    }

    fn observe(controller: &mut SessionController<MockRadioAdapter>, handle: PeripheralHandle) {
        controller.handle_event(AdapterEvent::PeripheralObserved(handle));
    }

    /// Drive a controller to Connected with the heart-rate characteristics.
    fn connected_controller(adapter: MockRadioAdapter) -> SessionController<MockRadioAdapter> {
        let mut controller = SessionController::new(adapter);
        assert_ok!(controller.start_scan());
        observe(&mut controller, PeripheralHandle::new(p1()).with_name("Android"));
        assert_ok!(controller.connect(&p1()));
        controller.handle_event(AdapterEvent::ConnectionEstablished { peripheral: p1() });
        controller.handle_event(AdapterEvent::ServicesDiscovered {
            peripheral: p1(),
            result: Ok(vec![hr_service()]),
        });
        controller.handle_event(AdapterEvent::CharacteristicsDiscovered {
            peripheral: p1(),
            service: hr_service(),
            result: Ok(vec![notify_char(), write_char()]),
        });
        controller
    }

    #[test]
    fn test_start_scan_requires_powered_on() {
        for state in [
            AdapterState::Unknown,
            AdapterState::Resetting,
            AdapterState::Unsupported,
            AdapterState::Unauthorized,
            AdapterState::PoweredOff,
        ] {
            let mut adapter = MockRadioAdapter::new();
            adapter.expect_state().return_const(state);
            adapter.expect_start_scan().never();

            let mut controller = SessionController::new(adapter);
            let result = controller.start_scan();

            assert!(matches!(result, Err(Error::AdapterNotReady { .. })));
            assert!(!controller.is_scanning());
            assert_eq!(controller.state(), &SessionState::Idle);
        }
    }

    #[test]
    fn test_start_scan_uses_target_filter() {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_state().return_const(AdapterState::PoweredOn);
        adapter
            .expect_start_scan()
            .withf(|services| services.to_vec() == vec![HEART_RATE_SERVICE_UUID])
            .times(1)
            .returning(|_| Ok(()));

        let mut controller = SessionController::new(adapter);
        assert_ok!(controller.start_scan());
        assert!(controller.is_scanning());
        assert_eq!(controller.state().kind(), SessionStateKind::Scanning);
        assert_eq!(controller.status(), "Scanning...");
    }

    #[test]
    fn test_stop_scan_returns_to_idle() {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_state().return_const(AdapterState::PoweredOn);
        adapter.expect_start_scan().returning(|_| Ok(()));
        adapter.expect_stop_scan().times(1).returning(|| Ok(()));

        let mut controller = SessionController::new(adapter);
        assert_ok!(controller.start_scan());
        assert_ok!(controller.stop_scan());
        assert!(!controller.is_scanning());
        assert_eq!(controller.state(), &SessionState::Idle);

        // Second stop is a no-op and does not reach the adapter
        assert_ok!(controller.stop_scan());
    }

    #[test]
    fn test_duplicate_advertisement_refreshes_signal() {
        let mut controller = SessionController::new(permissive_adapter());
        assert_ok!(controller.start_scan());

        observe(&mut controller, PeripheralHandle::new(p1()).with_rssi(-80));
        observe(&mut controller, PeripheralHandle::new(p1()).with_rssi(-40));

        assert_eq!(controller.peripherals().len(), 1);
        assert_eq!(controller.peripherals()[0].rssi, Some(-40));
        assert!(controller
            .peripheral_details(&p1())
            .is_some_and(|d| d.contains("RSSI: -40 dBm")));
    }

    #[test]
    fn test_duplicate_advertisement_ignored_by_policy() {
        let config = SessionConfig::default().with_duplicates(DuplicatePolicy::Ignore);
        let mut controller = SessionController::with_config(permissive_adapter(), config);
        assert_ok!(controller.start_scan());

        observe(&mut controller, PeripheralHandle::new(p1()).with_rssi(-80));
        let revision = controller.revision();
        observe(&mut controller, PeripheralHandle::new(p1()).with_rssi(-40));

        assert_eq!(controller.peripherals().len(), 1);
        assert_eq!(controller.peripherals()[0].rssi, Some(-80));
        assert_eq!(controller.revision(), revision);
    }

    #[test]
    fn test_advertisements_ignored_when_not_scanning() {
        let mut controller = SessionController::new(permissive_adapter());
        observe(&mut controller, PeripheralHandle::new(p1()));
        assert!(controller.peripherals().is_empty());
    }

    #[test]
    fn test_start_scan_clears_previous_results() {
        let mut controller = SessionController::new(permissive_adapter());
        assert_ok!(controller.start_scan());
        observe(&mut controller, PeripheralHandle::new(p1()));
        assert_ok!(controller.start_scan());
        assert!(controller.peripherals().is_empty());
        assert!(controller.peripheral_details(&p1()).is_none());
    }

    #[test]
    fn test_connect_unknown_peripheral_is_noop() {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_connect().never();

        let mut controller = SessionController::new(adapter);
        let result = controller.connect(&p1());
        assert!(matches!(result, Err(Error::PeripheralNotFound { .. })));
        assert_eq!(controller.state(), &SessionState::Idle);
    }

    #[test]
    fn test_connect_while_connecting_is_noop() {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_state().return_const(AdapterState::PoweredOn);
        adapter.expect_start_scan().returning(|_| Ok(()));
        adapter.expect_connect().times(1).returning(|_| Ok(()));

        let mut controller = SessionController::new(adapter);
        assert_ok!(controller.start_scan());
        observe(&mut controller, PeripheralHandle::new(p1()));
        assert_ok!(controller.connect(&p1()));
        assert_eq!(controller.state().kind(), SessionStateKind::Connecting);

        let result = controller.connect(&p1());
        assert!(matches!(result, Err(Error::InvalidState { .. })));
    }

    #[test]
    fn test_connection_requests_scoped_service_discovery() {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_state().return_const(AdapterState::PoweredOn);
        adapter.expect_start_scan().returning(|_| Ok(()));
        adapter.expect_connect().returning(|_| Ok(()));
        adapter
            .expect_discover_services()
            .with(
                eq(p1()),
                eq(DiscoveryScope::Only(vec![HEART_RATE_SERVICE_UUID])),
            )
            .times(1)
            .returning(|_, _| Ok(()));

        let mut controller = SessionController::new(adapter);
        assert_ok!(controller.start_scan());
        observe(&mut controller, PeripheralHandle::new(p1()).with_name("Android"));
        assert_ok!(controller.connect(&p1()));
        controller.handle_event(AdapterEvent::ConnectionEstablished { peripheral: p1() });

        assert_eq!(controller.state().kind(), SessionStateKind::Connected);
        assert_eq!(
            controller.connected_peripheral().map(|p| p.id.clone()),
            Some(p1())
        );
        assert!(controller.services().is_empty());
        assert!(controller.characteristics().is_empty());
        assert_eq!(controller.status(), "Connected to Android");
    }

    #[test]
    fn test_unexpected_connection_is_ignored() {
        let mut controller = SessionController::new(permissive_adapter());
        controller.handle_event(AdapterEvent::ConnectionEstablished { peripheral: p1() });
        assert_eq!(controller.state(), &SessionState::Idle);
        assert!(controller.connected_peripheral().is_none());
    }

    #[test]
    fn test_only_matching_services_get_characteristic_discovery() {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_state().return_const(AdapterState::PoweredOn);
        adapter.expect_start_scan().returning(|_| Ok(()));
        adapter.expect_connect().returning(|_| Ok(()));
        adapter.expect_discover_services().returning(|_, _| Ok(()));
        adapter
            .expect_discover_characteristics()
            .withf(|_, service, scope| {
                service.uuid == HEART_RATE_SERVICE_UUID
                    && *scope
                        == DiscoveryScope::Only(vec![
                            HEART_RATE_MEASUREMENT_UUID,
                            HEART_RATE_CONTROL_POINT_UUID,
                        ])
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut controller = SessionController::new(adapter);
        assert_ok!(controller.start_scan());
        observe(&mut controller, PeripheralHandle::new(p1()));
        assert_ok!(controller.connect(&p1()));
        controller.handle_event(AdapterEvent::ConnectionEstablished { peripheral: p1() });
        controller.handle_event(AdapterEvent::ServicesDiscovered {
            peripheral: p1(),
            result: Ok(vec![
                ServiceDescriptor::new(from_short(0x180A)),
                hr_service(),
            ]),
        });

        assert_eq!(controller.services().len(), 2);
    }

    #[test]
    fn test_connect_discover_subscribe_scenario() {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_state().return_const(AdapterState::PoweredOn);
        adapter.expect_start_scan().returning(|_| Ok(()));
        adapter.expect_connect().returning(|_| Ok(()));
        adapter.expect_discover_services().returning(|_, _| Ok(()));
        adapter
            .expect_discover_characteristics()
            .returning(|_, _, _| Ok(()));
        adapter
            .expect_set_notify()
            .withf(|_, c, enabled| c.uuid == HEART_RATE_MEASUREMENT_UUID && *enabled)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let controller = connected_controller(adapter);

        let snapshot = controller.snapshot();
        assert_eq!(
            snapshot.subscriptions.into_iter().collect::<Vec<_>>(),
            vec![HEART_RATE_MEASUREMENT_UUID]
        );
        assert!(snapshot.can_send);
        assert_eq!(snapshot.characteristics, vec![notify_char(), write_char()]);
    }

    #[test]
    fn test_capability_strategy_classifies_by_flags() {
        let config = SessionConfig::capability_based();
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_state().return_const(AdapterState::PoweredOn);
        adapter
            .expect_start_scan()
            .withf(|services| services.is_empty())
            .returning(|_| Ok(()));
        adapter.expect_connect().returning(|_| Ok(()));
        adapter
            .expect_discover_services()
            .with(eq(p1()), eq(DiscoveryScope::All))
            .returning(|_, _| Ok(()));
        adapter
            .expect_discover_characteristics()
            .times(2)
            .returning(|_, _, _| Ok(()));
        adapter.expect_set_notify().times(1).returning(|_, _, _| Ok(()));

        let custom_service = ServiceDescriptor::new(from_short(0xFFF0));
        let custom_notify = CharacteristicDescriptor::new(
            from_short(0xFFF1),
            from_short(0xFFF0),
            CharacteristicProperties::NOTIFY,
        );
        let custom_write = CharacteristicDescriptor::new(
            from_short(0xFFF2),
            from_short(0xFFF0),
            CharacteristicProperties {
                write_without_response: true,
                ..Default::default()
            },
        );

        let mut controller = SessionController::with_config(adapter, config);
        assert_ok!(controller.start_scan());
        observe(&mut controller, PeripheralHandle::new(p1()));
        assert_ok!(controller.connect(&p1()));
        controller.handle_event(AdapterEvent::ConnectionEstablished { peripheral: p1() });
        controller.handle_event(AdapterEvent::ServicesDiscovered {
            peripheral: p1(),
            result: Ok(vec![custom_service, ServiceDescriptor::new(from_short(0x180A))]),
        });
        controller.handle_event(AdapterEvent::CharacteristicsDiscovered {
            peripheral: p1(),
            service: custom_service,
            result: Ok(vec![custom_notify, custom_write]),
        });

        assert!(controller.is_subscribed(&custom_notify.uuid));
        assert!(controller.can_send());
        assert_eq!(
            controller.state().connected().and_then(|s| s.write_channel),
            Some(custom_write)
        );
    }

    #[test]
    fn test_fixed_strategy_with_custom_profile() {
        let service = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);
        let tx = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e24dcca9e);
        let profile = TargetProfile::new("6E400001-B5A3-F393-E0A9-E50E24DCCA9E")
            .with_notify("6E400003-B5A3-F393-E0A9-E50E24DCCA9E");
        let config = SessionConfig::default().with_discovery(DiscoveryStrategy::Fixed(profile));

        let mut controller = SessionController::with_config(permissive_adapter(), config);
        assert_ok!(controller.start_scan());
        observe(&mut controller, PeripheralHandle::new(p1()));
        assert_ok!(controller.connect(&p1()));
        controller.handle_event(AdapterEvent::ConnectionEstablished { peripheral: p1() });
        controller.handle_event(AdapterEvent::ServicesDiscovered {
            peripheral: p1(),
            result: Ok(vec![ServiceDescriptor::new(service)]),
        });
        controller.handle_event(AdapterEvent::CharacteristicsDiscovered {
            peripheral: p1(),
            service: ServiceDescriptor::new(service),
            result: Ok(vec![CharacteristicDescriptor::new(
                tx,
                service,
                CharacteristicProperties::NOTIFY,
            )]),
        });

        assert!(controller.is_subscribed(&tx));
        assert!(!controller.can_send());
    }

    #[test]
    fn test_value_updates_decode_and_store() {
        let mut controller = connected_controller(permissive_adapter());

        controller.handle_event(AdapterEvent::ValueUpdated {
            peripheral: p1(),
            characteristic: notify_char(),
            result: Ok(Bytes::from_static(b"72")),
        });
        assert_eq!(
            controller
                .value(&HEART_RATE_MEASUREMENT_UUID)
                .map(|v| v.text.as_str()),
            Some("72")
        );
        assert_eq!(controller.status(), "Received: 72");

        controller.handle_event(AdapterEvent::ValueUpdated {
            peripheral: p1(),
            characteristic: notify_char(),
            result: Ok(Bytes::from_static(&[0x16, 0xFF, 0x80])),
        });
        assert_eq!(
            controller
                .value(&HEART_RATE_MEASUREMENT_UUID)
                .map(|v| v.text.as_str()),
            Some("16FF80")
        );
    }

    #[test]
    fn test_read_failure_is_recorded_not_fatal() {
        let mut controller = connected_controller(permissive_adapter());

        controller.handle_event(AdapterEvent::ValueUpdated {
            peripheral: p1(),
            characteristic: notify_char(),
            result: Err(AdapterError::new(AdapterErrorKind::Read, "timeout")),
        });

        assert_eq!(controller.state().kind(), SessionStateKind::Connected);
        assert_eq!(
            controller.last_error().map(|e| e.kind),
            Some(AdapterErrorKind::Read)
        );
        assert!(controller.value(&HEART_RATE_MEASUREMENT_UUID).is_none());
    }

    #[test]
    fn test_discovery_failure_leaves_partial_session() {
        let mut controller = connected_controller(permissive_adapter());

        controller.handle_event(AdapterEvent::CharacteristicsDiscovered {
            peripheral: p1(),
            service: ServiceDescriptor::new(from_short(0x180A)),
            result: Err(AdapterError::new(AdapterErrorKind::Discovery, "GATT error")),
        });

        assert_eq!(controller.state().kind(), SessionStateKind::Connected);
        assert_eq!(controller.characteristics().len(), 2);
        assert!(controller.can_send());
    }

    #[test]
    fn test_send_without_write_channel_is_noop() {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_state().return_const(AdapterState::PoweredOn);
        adapter.expect_start_scan().returning(|_| Ok(()));
        adapter.expect_connect().returning(|_| Ok(()));
        adapter.expect_discover_services().returning(|_, _| Ok(()));
        adapter.expect_write().never();

        let mut controller = SessionController::new(adapter);

        // Not connected at all
        assert!(matches!(controller.send("hi"), Err(Error::NotConnected)));

        assert_ok!(controller.start_scan());
        observe(&mut controller, PeripheralHandle::new(p1()));
        assert_ok!(controller.connect(&p1()));
        controller.handle_event(AdapterEvent::ConnectionEstablished { peripheral: p1() });

        let before = controller.snapshot();
        assert!(matches!(controller.send("hi"), Err(Error::NoWriteChannel)));
        assert_eq!(controller.snapshot(), before);
    }

    #[test]
    fn test_send_writes_utf8_to_channel() {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_state().return_const(AdapterState::PoweredOn);
        adapter.expect_start_scan().returning(|_| Ok(()));
        adapter.expect_connect().returning(|_| Ok(()));
        adapter.expect_discover_services().returning(|_, _| Ok(()));
        adapter
            .expect_discover_characteristics()
            .returning(|_, _, _| Ok(()));
        adapter.expect_set_notify().returning(|_, _, _| Ok(()));
        adapter
            .expect_write()
            .withf(|id, c, data, kind| {
                *id == PeripheralId::from("P1")
                    && c.uuid == HEART_RATE_CONTROL_POINT_UUID
                    && &data[..] == "你好".as_bytes()
                    && *kind == WriteKind::WithResponse
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let mut controller = connected_controller(adapter);
        assert_ok!(controller.send("你好"));

        // Write failures are logged only
        controller.handle_event(AdapterEvent::WriteResult {
            peripheral: p1(),
            characteristic: write_char(),
            result: Err(AdapterError::new(AdapterErrorKind::Write, "rejected")),
        });
        assert_eq!(controller.state().kind(), SessionStateKind::Connected);
        assert!(controller.can_send());
    }

    #[test]
    fn test_unsubscribe_purges_value_but_updates_still_accepted() {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_state().return_const(AdapterState::PoweredOn);
        adapter.expect_start_scan().returning(|_| Ok(()));
        adapter.expect_connect().returning(|_| Ok(()));
        adapter.expect_discover_services().returning(|_, _| Ok(()));
        adapter
            .expect_discover_characteristics()
            .returning(|_, _, _| Ok(()));
        adapter
            .expect_set_notify()
            .withf(|_, _, enabled| *enabled)
            .times(1)
            .returning(|_, _, _| Ok(()));
        adapter
            .expect_set_notify()
            .withf(|_, c, enabled| c.uuid == HEART_RATE_MEASUREMENT_UUID && !*enabled)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut controller = connected_controller(adapter);
        let value_event = || AdapterEvent::ValueUpdated {
            peripheral: p1(),
            characteristic: notify_char(),
            result: Ok(Bytes::from_static(b"80")),
        };

        controller.handle_event(value_event());
        assert_ok!(controller.unsubscribe(&HEART_RATE_MEASUREMENT_UUID));

        assert!(!controller.is_subscribed(&HEART_RATE_MEASUREMENT_UUID));
        assert!(controller.value(&HEART_RATE_MEASUREMENT_UUID).is_none());

        controller.handle_event(value_event());
        assert_eq!(
            controller
                .value(&HEART_RATE_MEASUREMENT_UUID)
                .map(|v| v.text.as_str()),
            Some("80")
        );
    }

    #[test]
    fn test_subscribe_requires_notify_capability() {
        let mut controller = connected_controller(permissive_adapter());

        let result = controller.subscribe(&HEART_RATE_CONTROL_POINT_UUID);
        assert!(matches!(result, Err(Error::NotNotifiable { .. })));

        let result = controller.subscribe(&from_short(0x2A99));
        assert!(matches!(result, Err(Error::CharacteristicNotFound { .. })));

        assert_ok!(controller.unsubscribe(&HEART_RATE_MEASUREMENT_UUID));
        assert_ok!(controller.subscribe(&HEART_RATE_MEASUREMENT_UUID));
        assert!(controller.is_subscribed(&HEART_RATE_MEASUREMENT_UUID));
    }

    #[test]
    fn test_unsubscribe_all() {
        let mut controller = connected_controller(permissive_adapter());
        controller.handle_event(AdapterEvent::ValueUpdated {
            peripheral: p1(),
            characteristic: notify_char(),
            result: Ok(Bytes::from_static(b"64")),
        });

        assert_ok!(controller.unsubscribe_all());

        let snapshot = controller.snapshot();
        assert!(snapshot.subscriptions.is_empty());
        assert!(snapshot.values.is_empty());
        assert!(snapshot.can_send);
    }

    #[test]
    fn test_disconnect_clears_session() {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_state().return_const(AdapterState::PoweredOn);
        adapter.expect_start_scan().returning(|_| Ok(()));
        adapter.expect_stop_scan().returning(|| Ok(()));
        adapter.expect_connect().returning(|_| Ok(()));
        adapter.expect_discover_services().returning(|_, _| Ok(()));
        adapter
            .expect_discover_characteristics()
            .returning(|_, _, _| Ok(()));
        adapter
            .expect_set_notify()
            .withf(|_, _, enabled| *enabled)
            .returning(|_, _, _| Ok(()));
        // Best effort: the unsubscribe failure must not stop the disconnect
        adapter
            .expect_set_notify()
            .withf(|_, _, enabled| !*enabled)
            .times(1)
            .returning(|_, _, _| Err(Error::NotConnected));
        adapter
            .expect_disconnect()
            .with(eq(p1()))
            .times(1)
            .returning(|_| Ok(()));

        let mut controller = connected_controller(adapter);
        assert_ok!(controller.disconnect());
        assert_eq!(controller.state().kind(), SessionStateKind::Disconnecting);
        assert!(controller.connected_peripheral().is_none());

        controller.handle_event(AdapterEvent::Disconnected {
            peripheral: p1(),
            error: None,
        });

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, SessionStateKind::Idle);
        assert!(snapshot.connected.is_none());
        assert!(snapshot.services.is_empty());
        assert!(snapshot.characteristics.is_empty());
        assert!(snapshot.subscriptions.is_empty());
        assert!(!snapshot.can_send);
        assert_eq!(snapshot.status, "Disconnected");
    }

    #[test]
    fn test_unsolicited_disconnect_resets_session() {
        let mut controller = connected_controller(permissive_adapter());

        controller.handle_event(AdapterEvent::Disconnected {
            peripheral: p1(),
            error: Some(AdapterError::new(
                AdapterErrorKind::Connection,
                "link supervision timeout",
            )),
        });

        // The scan keeps running, but the lifecycle state is always Idle
        assert_eq!(controller.state(), &SessionState::Idle);
        assert!(controller.is_scanning());
        assert!(controller.connected_peripheral().is_none());
        assert!(!controller.can_send());
        assert_eq!(
            controller.last_error().map(|e| e.kind),
            Some(AdapterErrorKind::Connection)
        );
    }

    #[test]
    fn test_disconnect_of_other_peripheral_is_ignored() {
        let mut controller = connected_controller(permissive_adapter());
        controller.handle_event(AdapterEvent::Disconnected {
            peripheral: PeripheralId::from("P2"),
            error: None,
        });
        assert_eq!(controller.state().kind(), SessionStateKind::Connected);
    }

    #[test]
    fn test_disconnect_when_idle_is_noop() {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_disconnect().never();

        let mut controller = SessionController::new(adapter);
        assert_err!(controller.disconnect());
        assert_eq!(controller.state(), &SessionState::Idle);
    }

    #[test]
    fn test_connection_failure_returns_to_scanning() {
        let mut controller = SessionController::new(permissive_adapter());
        assert_ok!(controller.start_scan());
        observe(&mut controller, PeripheralHandle::new(p1()));
        assert_ok!(controller.connect(&p1()));

        controller.handle_event(AdapterEvent::ConnectionFailed {
            peripheral: p1(),
            error: AdapterError::new(AdapterErrorKind::Connection, "refused"),
        });

        assert_eq!(controller.state(), &SessionState::Scanning);
        assert_eq!(controller.status(), "connection failed: refused");
    }

    #[test]
    fn test_power_loss_stops_scanning() {
        let mut controller = SessionController::new(permissive_adapter());
        assert_ok!(controller.start_scan());

        controller.handle_event(AdapterEvent::StateChanged(AdapterState::PoweredOff));

        assert!(!controller.is_scanning());
        assert_eq!(controller.state(), &SessionState::Idle);
        assert_eq!(controller.adapter_state(), AdapterState::PoweredOff);
    }

    #[test]
    fn test_events_after_disconnect_are_ignored() {
        let mut controller = connected_controller(permissive_adapter());
        controller.handle_event(AdapterEvent::Disconnected {
            peripheral: p1(),
            error: None,
        });

        controller.handle_event(AdapterEvent::ValueUpdated {
            peripheral: p1(),
            characteristic: notify_char(),
            result: Ok(Bytes::from_static(b"late")),
        });
        assert!(controller.snapshot().values.is_empty());
    }

    #[test]
    fn test_requested_disconnect_lands_in_idle_while_scanning() {
        let mut controller = connected_controller(permissive_adapter());
        assert!(controller.is_scanning());

        assert_ok!(controller.disconnect());
        controller.handle_event(AdapterEvent::Disconnected {
            peripheral: p1(),
            error: None,
        });

        assert_eq!(controller.state(), &SessionState::Idle);
        assert_eq!(controller.snapshot().state, SessionStateKind::Idle);
    }

    #[test]
    fn test_late_notify_failure_after_disconnect_is_ignored() {
        let mut controller = connected_controller(permissive_adapter());
        assert_ok!(controller.disconnect());
        controller.handle_event(AdapterEvent::Disconnected {
            peripheral: p1(),
            error: None,
        });
        let revision = controller.revision();

        controller.handle_event(AdapterEvent::NotificationStateChanged {
            peripheral: p1(),
            characteristic: notify_char(),
            enabled: false,
            result: Err(AdapterError::new(AdapterErrorKind::Notify, "not connected")),
        });
        controller.handle_event(AdapterEvent::WriteResult {
            peripheral: p1(),
            characteristic: write_char(),
            result: Err(AdapterError::new(AdapterErrorKind::Write, "not connected")),
        });

        assert_eq!(controller.status(), "Disconnected");
        assert!(controller.last_error().is_none());
        assert_eq!(controller.revision(), revision);
    }

    #[test]
    fn test_failures_for_other_peripheral_are_ignored() {
        let mut controller = connected_controller(permissive_adapter());
        let other = PeripheralId::from("P2");

        controller.handle_event(AdapterEvent::ServicesDiscovered {
            peripheral: other.clone(),
            result: Err(AdapterError::new(AdapterErrorKind::Discovery, "stale")),
        });
        controller.handle_event(AdapterEvent::CharacteristicsDiscovered {
            peripheral: other.clone(),
            service: hr_service(),
            result: Err(AdapterError::new(AdapterErrorKind::Discovery, "stale")),
        });
        controller.handle_event(AdapterEvent::ValueUpdated {
            peripheral: other,
            characteristic: notify_char(),
            result: Err(AdapterError::new(AdapterErrorKind::Read, "stale")),
        });

        assert!(controller.last_error().is_none());
        assert_eq!(controller.state().kind(), SessionStateKind::Connected);
    }

    #[test]
    fn test_unsubscribe_without_change_does_not_bump_revision() {
        let mut controller = connected_controller(permissive_adapter());
        let revision = controller.revision();

        assert_ok!(controller.unsubscribe(&HEART_RATE_CONTROL_POINT_UUID));
        assert_ok!(controller.unsubscribe(&from_short(0x2A99)));
        assert_eq!(controller.revision(), revision);

        assert_ok!(controller.unsubscribe(&HEART_RATE_MEASUREMENT_UUID));
        assert!(controller.revision() > revision);

        let revision = controller.revision();
        assert_ok!(controller.unsubscribe_all());
        assert_eq!(controller.revision(), revision);
    }

    proptest! {
        #[test]
        fn prop_discovered_list_has_unique_ids_in_first_seen_order(
            ids in proptest::collection::vec(0u8..8, 0..40),
            ignore in any::<bool>(),
        ) {
            let policy = if ignore { DuplicatePolicy::Ignore } else { DuplicatePolicy::RefreshSignal };
            let config = SessionConfig::default().with_duplicates(policy);
            let mut controller = SessionController::with_config(permissive_adapter(), config);
            controller.start_scan().unwrap();

            for (rssi, id) in ids.iter().enumerate() {
                observe(
                    &mut controller,
                    PeripheralHandle::new(format!("P{}", id)).with_rssi(-(rssi as i16)),
                );
            }

            let mut expected: Vec<String> = Vec::new();
            for id in &ids {
                let id = format!("P{}", id);
                if !expected.contains(&id) {
                    expected.push(id);
                }
            }

            let actual: Vec<String> = controller
                .peripherals()
                .iter()
                .map(|p| p.id.to_string())
                .collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
