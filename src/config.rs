//! Session configuration.
//!
//! Chooses how services and characteristics are selected after connecting
//! and how repeated advertisements are treated.

use uuid::Uuid;

use crate::ble::adapter::DiscoveryScope;
use crate::ble::gatt::{CharacteristicDescriptor, ServiceDescriptor};
use crate::ble::uuids::{
    matches_suffix, parse_id, HEART_RATE_CONTROL_POINT, HEART_RATE_MEASUREMENT,
    HEART_RATE_SERVICE,
};

/// Fixed well-known identifiers to look for on the peripheral.
///
/// Identifiers are matched as an exact suffix of the discovered UUID, so
/// both short (`"180D"`) and full UUID strings work.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetProfile {
    /// Service to discover characteristics on.
    pub service: String,
    /// Characteristic to subscribe to automatically.
    pub notify_characteristic: Option<String>,
    /// Characteristic to use as the outbound channel.
    pub write_characteristic: Option<String>,
}

impl TargetProfile {
    /// Create a profile for a service with no designated characteristics.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            notify_characteristic: None,
            write_characteristic: None,
        }
    }

    /// The heart-rate profile published by the Android peripheral.
    pub fn heart_rate() -> Self {
        Self::new(HEART_RATE_SERVICE)
            .with_notify(HEART_RATE_MEASUREMENT)
            .with_write(HEART_RATE_CONTROL_POINT)
    }

    /// Set the notify characteristic.
    pub fn with_notify(mut self, id: impl Into<String>) -> Self {
        self.notify_characteristic = Some(id.into());
        self
    }

    /// Set the write characteristic.
    pub fn with_write(mut self, id: impl Into<String>) -> Self {
        self.write_characteristic = Some(id.into());
        self
    }

    fn characteristic_ids(&self) -> impl Iterator<Item = &str> {
        self.notify_characteristic
            .iter()
            .chain(self.write_characteristic.iter())
            .map(String::as_str)
    }
}

/// How the session selects services and classifies characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiscoveryStrategy {
    /// Discover only the configured identifiers.
    Fixed(TargetProfile),
    /// Discover everything and classify by GATT property flags.
    Capabilities,
}

impl Default for DiscoveryStrategy {
    fn default() -> Self {
        Self::Fixed(TargetProfile::heart_rate())
    }
}

/// What the controller does with a freshly discovered characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AutoAction {
    /// Subscribe to value notifications.
    pub subscribe: bool,
    /// Record as the outbound write channel.
    pub write_channel: bool,
}

impl DiscoveryStrategy {
    /// Service UUIDs to restrict scanning to, if any.
    pub fn scan_services(&self) -> Vec<Uuid> {
        match self {
            Self::Fixed(profile) => parse_id(&profile.service).into_iter().collect(),
            Self::Capabilities => Vec::new(),
        }
    }

    /// Scope for the service discovery request.
    pub fn service_scope(&self) -> DiscoveryScope {
        match self {
            Self::Fixed(profile) => match parse_id(&profile.service) {
                Some(uuid) => DiscoveryScope::Only(vec![uuid]),
                None => DiscoveryScope::All,
            },
            Self::Capabilities => DiscoveryScope::All,
        }
    }

    /// Scope for characteristic discovery on a matching service.
    pub fn characteristic_scope(&self) -> DiscoveryScope {
        match self {
            Self::Fixed(profile) => {
                let parsed: Option<Vec<Uuid>> = profile.characteristic_ids().map(parse_id).collect();
                match parsed {
                    Some(uuids) if !uuids.is_empty() => DiscoveryScope::Only(uuids),
                    _ => DiscoveryScope::All,
                }
            }
            Self::Capabilities => DiscoveryScope::All,
        }
    }

    /// Whether characteristics of `service` should be discovered.
    pub fn wants_service(&self, service: &ServiceDescriptor) -> bool {
        match self {
            Self::Fixed(profile) => matches_suffix(&service.uuid, &profile.service),
            Self::Capabilities => true,
        }
    }

    /// Whether `uuid` is the designated target service.
    pub fn is_target_service(&self, uuid: &Uuid) -> bool {
        match self {
            Self::Fixed(profile) => matches_suffix(uuid, &profile.service),
            Self::Capabilities => false,
        }
    }

    /// Label of the target service for detail records.
    pub fn target_service(&self) -> Option<&str> {
        match self {
            Self::Fixed(profile) => Some(profile.service.as_str()),
            Self::Capabilities => None,
        }
    }

    /// Classify a freshly discovered characteristic.
    ///
    /// Under the fixed strategy a characteristic is the notify target or the
    /// write target, never both; the notify capability is still required to
    /// subscribe.
    pub fn classify(&self, characteristic: &CharacteristicDescriptor) -> AutoAction {
        match self {
            Self::Fixed(profile) => {
                let is = |target: &Option<String>| {
                    target
                        .as_deref()
                        .is_some_and(|id| matches_suffix(&characteristic.uuid, id))
                };
                if is(&profile.notify_characteristic) {
                    AutoAction {
                        subscribe: characteristic.is_notifiable(),
                        write_channel: false,
                    }
                } else if is(&profile.write_characteristic) {
                    AutoAction {
                        subscribe: false,
                        write_channel: true,
                    }
                } else {
                    AutoAction::default()
                }
            }
            Self::Capabilities => AutoAction {
                subscribe: characteristic.is_notifiable(),
                write_channel: characteristic.is_writable(),
            },
        }
    }
}

/// Policy for advertisements from an already known peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DuplicatePolicy {
    /// Keep the first observation untouched.
    Ignore,
    /// Keep the list position but refresh signal strength and details.
    #[default]
    RefreshSignal,
}

/// Configuration for a BLE session.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// Service/characteristic selection strategy.
    pub discovery: DiscoveryStrategy,
    /// Handling of repeated advertisements.
    pub duplicates: DuplicatePolicy,
    /// Restrict scanning to peripherals advertising the target service.
    pub scan_for_target_service: bool,
    /// Forget previously discovered peripherals when a scan starts.
    pub clear_on_scan: bool,
    /// Capacity of the snapshot broadcast channel.
    pub observer_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryStrategy::default(),
            duplicates: DuplicatePolicy::default(),
            scan_for_target_service: true,
            clear_on_scan: true,
            observer_capacity: 64,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept any service and classify characteristics by capability.
    pub fn capability_based() -> Self {
        Self::default()
            .with_discovery(DiscoveryStrategy::Capabilities)
            .with_scan_for_target_service(false)
    }

    /// Set the discovery strategy.
    pub fn with_discovery(mut self, discovery: DiscoveryStrategy) -> Self {
        self.discovery = discovery;
        self
    }

    /// Set the duplicate advertisement policy.
    pub fn with_duplicates(mut self, duplicates: DuplicatePolicy) -> Self {
        self.duplicates = duplicates;
        self
    }

    /// Enable or disable scan filtering by target service.
    pub fn with_scan_for_target_service(mut self, enabled: bool) -> Self {
        self.scan_for_target_service = enabled;
        self
    }

    /// Enable or disable clearing the peripheral list on scan start.
    pub fn with_clear_on_scan(mut self, enabled: bool) -> Self {
        self.clear_on_scan = enabled;
        self
    }

    /// Set the snapshot channel capacity.
    pub fn with_observer_capacity(mut self, capacity: usize) -> Self {
        self.observer_capacity = capacity.max(1);
        self
    }

    /// Service filter to pass to the adapter when scanning.
    pub fn scan_filter(&self) -> Vec<Uuid> {
        if self.scan_for_target_service {
            self.discovery.scan_services()
        } else {
            Vec::new()
        }
    }
}
