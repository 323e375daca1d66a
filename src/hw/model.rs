use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};
use time::OffsetDateTime;

const BLUETOOTH_BASE_UUID_SUFFIX: &str = "-0000-1000-8000-00805f9b34fb";

/// Name reported for peripherals that did not advertise one.
pub(crate) const UNKNOWN_DEVICE_NAME: &str = "Unknown";

/// Stable platform identifier for one peripheral.
#[derive(
    Debug,
    Clone,
    Eq,
    PartialEq,
    Hash,
    Ord,
    PartialOrd,
    derive_more::Display,
    derive_more::From,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Creates an identifier from a platform address or UUID string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeripheralId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Expands short-form Bluetooth UUIDs and lowercases the result.
///
/// `"FFE0"` and `"0000ffe0-0000-1000-8000-00805f9b34fb"` canonicalise to the
/// same text.
pub(crate) fn canonical_uuid(uuid: &str) -> String {
    let trimmed = uuid.trim();
    let is_hex = trimmed.chars().all(|c| c.is_ascii_hexdigit());
    match trimmed.len() {
        4 if is_hex => format!("0000{}{BLUETOOTH_BASE_UUID_SUFFIX}", trimmed.to_ascii_lowercase()),
        8 if is_hex => format!("{}{BLUETOOTH_BASE_UUID_SUFFIX}", trimmed.to_ascii_lowercase()),
        _ => trimmed.to_ascii_lowercase(),
    }
}

/// Compares two UUID strings ignoring case and short-form differences.
pub(crate) fn uuid_matches(left: &str, right: &str) -> bool {
    left.eq_ignore_ascii_case(right) || canonical_uuid(left) == canonical_uuid(right)
}

/// A single GATT characteristic capability flag.
#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Hash,
    Ord,
    PartialOrd,
    Display,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    #[strum(to_string = "read")]
    Read,
    #[strum(to_string = "write")]
    Write,
    #[strum(to_string = "writeWithoutResponse")]
    WriteWithoutResponse,
    #[strum(to_string = "notify")]
    Notify,
    #[strum(to_string = "indicate")]
    Indicate,
}

/// A characteristic discovered on a connected peripheral.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacteristicInfo {
    uuid: String,
    service_uuid: String,
    capabilities: BTreeSet<Capability>,
}

impl CharacteristicInfo {
    /// Creates a characteristic description with canonical UUID text.
    #[must_use]
    pub fn new(
        uuid: &str,
        service_uuid: &str,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        Self {
            uuid: canonical_uuid(uuid),
            service_uuid: canonical_uuid(service_uuid),
            capabilities: capabilities.into_iter().collect(),
        }
    }

    /// Returns the characteristic UUID.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Returns the UUID of the owning service.
    #[must_use]
    pub fn service_uuid(&self) -> &str {
        &self.service_uuid
    }

    /// Returns the capability flags.
    #[must_use]
    pub fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }

    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Returns whether the characteristic can push values to the central.
    #[must_use]
    pub fn supports_notify(&self) -> bool {
        self.supports(Capability::Notify) || self.supports(Capability::Indicate)
    }
}

/// A GATT service together with its characteristics.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    uuid: String,
    is_primary: bool,
    characteristics: Vec<CharacteristicInfo>,
}

impl ServiceInfo {
    /// Creates a service description with canonical UUID text.
    #[must_use]
    pub fn new(uuid: &str, is_primary: bool, characteristics: Vec<CharacteristicInfo>) -> Self {
        Self {
            uuid: canonical_uuid(uuid),
            is_primary,
            characteristics,
        }
    }

    /// Returns the service UUID.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Returns whether this is a primary service.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    /// Returns all characteristics in discovery order.
    #[must_use]
    pub fn characteristics(&self) -> &[CharacteristicInfo] {
        &self.characteristics
    }

    /// Finds a characteristic by UUID, ignoring case.
    #[must_use]
    pub fn characteristic(&self, uuid: &str) -> Option<&CharacteristicInfo> {
        self.characteristics
            .iter()
            .find(|characteristic| uuid_matches(characteristic.uuid(), uuid))
    }
}

/// Finds a service by UUID, ignoring case.
pub(crate) fn find_service<'a>(services: &'a [ServiceInfo], uuid: &str) -> Option<&'a ServiceInfo> {
    services
        .iter()
        .find(|service| uuid_matches(service.uuid(), uuid))
}

/// A peripheral observed during the current scan session.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DiscoveredPeripheral {
    id: PeripheralId,
    display_name: String,
    last_rssi: i16,
    last_seen_at: OffsetDateTime,
}

impl DiscoveredPeripheral {
    pub(crate) fn new(
        id: PeripheralId,
        display_name: String,
        last_rssi: i16,
        last_seen_at: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            display_name,
            last_rssi,
            last_seen_at,
        }
    }

    #[must_use]
    pub fn id(&self) -> &PeripheralId {
        &self.id
    }

    /// Returns the advertised name, or `Unknown`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[must_use]
    pub fn last_rssi(&self) -> i16 {
        self.last_rssi
    }

    /// Returns when the latest advertisement for this peripheral arrived.
    #[must_use]
    pub fn last_seen_at(&self) -> OffsetDateTime {
        self.last_seen_at
    }

    pub(crate) fn observe(&mut self, display_name: String, rssi: i16, seen_at: OffsetDateTime) {
        self.display_name = display_name;
        self.last_rssi = rssi;
        self.last_seen_at = seen_at;
    }
}

/// Lifecycle state of one peripheral connection.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    #[strum(to_string = "connecting")]
    Connecting,
    #[strum(to_string = "connected")]
    Connected,
    #[strum(to_string = "discoveringServices")]
    DiscoveringServices,
    #[strum(to_string = "ready")]
    Ready,
    #[strum(to_string = "disconnecting")]
    Disconnecting,
    #[strum(to_string = "disconnected")]
    Disconnected,
    #[strum(to_string = "failed")]
    Failed,
}

impl ConnectionState {
    /// Returns whether the state is absorbing.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }

    /// Returns whether GATT traffic can be issued in this state.
    #[must_use]
    pub fn has_link(self) -> bool {
        matches!(
            self,
            Self::Connected | Self::DiscoveringServices | Self::Ready
        )
    }
}

/// Power/authorisation state reported by the platform radio.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RadioState {
    #[strum(to_string = "poweredOn")]
    PoweredOn,
    #[strum(to_string = "poweredOff")]
    PoweredOff,
    #[strum(to_string = "resetting")]
    Resetting,
    #[strum(to_string = "unauthorized")]
    Unauthorized,
    #[strum(to_string = "unsupported")]
    Unsupported,
    #[strum(to_string = "unknown")]
    Unknown,
}
