use std::fmt::Debug;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::model::{Capability, PeripheralId, RadioState, canonical_uuid, uuid_matches};
use crate::error::DriverError;

/// Client characteristic configuration descriptor UUID.
pub(crate) const CCCD_UUID: &str = "00002902-0000-1000-8000-00805f9b34fb";
pub(crate) const CCCD_ENABLE_NOTIFICATION: [u8; 2] = [0x01, 0x00];
pub(crate) const CCCD_ENABLE_INDICATION: [u8; 2] = [0x02, 0x00];
pub(crate) const CCCD_DISABLE: [u8; 2] = [0x00, 0x00];

/// Stream of callbacks raised by a driver.
pub type DriverEvents = mpsc::UnboundedReceiver<DriverEvent>;

/// Producer half handed to driver implementations.
pub type DriverEventSink = mpsc::UnboundedSender<DriverEvent>;

/// Address of one characteristic on one peripheral.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct GattTarget {
    peripheral: PeripheralId,
    service_uuid: String,
    characteristic_uuid: String,
}

impl GattTarget {
    /// Creates a target with canonical UUID text.
    #[must_use]
    pub fn new(peripheral: PeripheralId, service_uuid: &str, characteristic_uuid: &str) -> Self {
        Self {
            peripheral,
            service_uuid: canonical_uuid(service_uuid),
            characteristic_uuid: canonical_uuid(characteristic_uuid),
        }
    }

    #[must_use]
    pub fn peripheral(&self) -> &PeripheralId {
        &self.peripheral
    }

    #[must_use]
    pub fn service_uuid(&self) -> &str {
        &self.service_uuid
    }

    #[must_use]
    pub fn characteristic_uuid(&self) -> &str {
        &self.characteristic_uuid
    }

    /// Returns whether two targets address the same characteristic.
    pub(crate) fn same_characteristic(&self, other: &GattTarget) -> bool {
        self.peripheral == other.peripheral
            && uuid_matches(&self.service_uuid, &other.service_uuid)
            && uuid_matches(&self.characteristic_uuid, &other.characteristic_uuid)
    }
}

/// Raw advertisement observed by the radio.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Advertisement {
    pub peripheral: PeripheralId,
    pub name: Option<String>,
    pub rssi: i16,
    pub service_hints: Vec<String>,
}

/// Characteristic as reported by a driver enumeration callback.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DriverCharacteristic {
    pub uuid: String,
    pub capabilities: Vec<Capability>,
}

/// Service as reported by a driver enumeration callback.
///
/// `characteristics` is `None` when the driver enumerates characteristics
/// per service in a separate pass.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DriverService {
    pub uuid: String,
    pub primary: bool,
    pub characteristics: Option<Vec<DriverCharacteristic>>,
}

/// How a driver handled a write submission.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WriteSubmission {
    /// The write is complete once submitted.
    Accepted,
    /// A `WriteConfirmed` event will follow.
    AwaitConfirmation,
}

/// ATT write type.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, strum_macros::Display)]
pub enum WriteMode {
    #[strum(to_string = "with_response")]
    WithResponse,
    #[strum(to_string = "without_response")]
    WithoutResponse,
}

/// Callbacks delivered from the platform stack into the core.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DriverEvent {
    Advertisement(Advertisement),
    ScanFailed {
        code: i32,
        message: String,
    },
    RadioState(RadioState),
    Connected(PeripheralId),
    ConnectFailed {
        peripheral: PeripheralId,
        reason: String,
    },
    /// Link closed, whether requested or not.
    Disconnected(PeripheralId),
    ServicesDiscovered {
        peripheral: PeripheralId,
        services: Vec<DriverService>,
    },
    ServiceDiscoveryFailed {
        peripheral: PeripheralId,
        reason: String,
    },
    CharacteristicsDiscovered {
        peripheral: PeripheralId,
        service_uuid: String,
        characteristics: Vec<DriverCharacteristic>,
    },
    ValueUpdated {
        target: GattTarget,
        value: Vec<u8>,
    },
    ReadFailed {
        target: GattTarget,
        reason: String,
    },
    WriteConfirmed {
        target: GattTarget,
        status: i32,
    },
}

impl DriverEvent {
    /// Returns the peripheral a per-connection event belongs to.
    pub(crate) fn peripheral(&self) -> Option<&PeripheralId> {
        match self {
            Self::Advertisement(_) | Self::ScanFailed { .. } | Self::RadioState(_) => None,
            Self::Connected(peripheral) | Self::Disconnected(peripheral) => Some(peripheral),
            Self::ConnectFailed { peripheral, .. }
            | Self::ServicesDiscovered { peripheral, .. }
            | Self::ServiceDiscoveryFailed { peripheral, .. }
            | Self::CharacteristicsDiscovered { peripheral, .. } => Some(peripheral),
            Self::ValueUpdated { target, .. }
            | Self::ReadFailed { target, .. }
            | Self::WriteConfirmed { target, .. } => Some(target.peripheral()),
        }
    }
}

/// Status code drivers report for a successful write confirmation.
pub const GATT_SUCCESS: i32 = 0;

/// Platform checks queried before a scan may start.
#[async_trait]
pub trait RadioPreconditions: Send + Sync {
    async fn radio_is_ready(&self) -> bool;

    async fn has_required_permissions(&self) -> bool;

    /// Some platforms refuse to scan while location services are off.
    async fn location_services_enabled(&self) -> bool {
        true
    }
}

/// Platform BLE primitives consumed by the core.
///
/// Every method returns once the primitive has been issued; outcomes arrive
/// later as [`DriverEvent`]s on the stream returned by [`BleDriver::events`].
#[async_trait]
pub trait BleDriver: RadioPreconditions + Debug {
    /// Takes the callback stream. Can only be taken once.
    async fn events(&self) -> Result<DriverEvents, DriverError>;

    async fn begin_scan(&self, filter_hint: Option<&str>) -> Result<(), DriverError>;

    async fn end_scan(&self) -> Result<(), DriverError>;

    async fn connect(&self, peripheral: &PeripheralId) -> Result<(), DriverError>;

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<(), DriverError>;

    /// Frees per-peripheral handles after the link is gone.
    async fn release(&self, peripheral: &PeripheralId);

    async fn discover_services(&self, peripheral: &PeripheralId) -> Result<(), DriverError>;

    async fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service_uuid: &str,
    ) -> Result<(), DriverError>;

    async fn set_characteristic_notification(
        &self,
        target: &GattTarget,
        enable: bool,
    ) -> Result<(), DriverError>;

    async fn write_descriptor(
        &self,
        target: &GattTarget,
        descriptor_uuid: &str,
        payload: &[u8],
    ) -> Result<(), DriverError>;

    async fn write_characteristic(
        &self,
        target: &GattTarget,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<WriteSubmission, DriverError>;

    async fn read_characteristic(&self, target: &GattTarget) -> Result<(), DriverError>;
}
