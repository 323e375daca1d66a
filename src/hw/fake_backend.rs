use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bon::Builder;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::driver::{
    Advertisement, BleDriver, CCCD_UUID, DriverCharacteristic, DriverEvent, DriverEventSink,
    DriverEvents, DriverService, GATT_SUCCESS, GattTarget, RadioPreconditions, WriteMode,
    WriteSubmission,
};
use super::model::{Capability, PeripheralId, RadioState, canonical_uuid, uuid_matches};
use crate::error::{DriverError, FixtureError};

/// Service exposed by the default fake peripheral.
pub const FAKE_SERVICE_UUID: &str = "0000ffe0-0000-1000-8000-00805f9b34fb";
/// Read/notify characteristic of the default fake peripheral.
pub const FAKE_NOTIFY_CHARACTERISTIC_UUID: &str = "0000ffe1-0000-1000-8000-00805f9b34fb";
/// Writable characteristic of the default fake peripheral.
pub const FAKE_WRITE_CHARACTERISTIC_UUID: &str = "0000ffe2-0000-1000-8000-00805f9b34fb";
const DEVICE_INFORMATION_SERVICE_UUID: &str = "0000180a-0000-1000-8000-00805f9b34fb";
const MANUFACTURER_NAME_UUID: &str = "00002a29-0000-1000-8000-00805f9b34fb";

/// Parsed `id|name|rssi;...` advertisement fixture.
///
/// A name of `-` stands for an advertisement without a local name.
#[derive(Debug, Clone, derive_more::Into)]
pub struct ScanFixture {
    advertisements: Vec<Advertisement>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Err(FixtureError::EmptyFixture);
        }
        let advertisements = value
            .split(';')
            .filter(|record| !record.trim().is_empty())
            .map(parse_scan_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { advertisements })
    }
}

/// Parsed hex payload, whitespace tolerated.
#[derive(Debug, Clone, Eq, PartialEq, derive_more::Into)]
pub struct HexPayload {
    payload: Vec<u8>,
}

impl FromStr for HexPayload {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let cleaned: String = value.chars().filter(|c| !c.is_whitespace()).collect();
        Ok(Self {
            payload: hex::decode(cleaned)?,
        })
    }
}

impl HexPayload {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }
}

/// Parsed comma-separated hex payloads.
#[derive(Debug, Clone, Eq, PartialEq, derive_more::Into)]
pub struct NotificationPayloads {
    payloads: Vec<Vec<u8>>,
}

impl FromStr for NotificationPayloads {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let payloads = value
            .split(',')
            .filter(|payload| !payload.trim().is_empty())
            .map(|payload| payload.parse::<HexPayload>().map(Vec::from))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { payloads })
    }
}

/// How the fake answers characteristic writes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FakeWriteBehaviour {
    /// Completes on submission.
    Accept,
    /// Emits a confirmation carrying `status`.
    Confirm { status: i32 },
    /// Waits for a confirmation that never comes.
    Withhold,
}

impl Default for FakeWriteBehaviour {
    fn default() -> Self {
        Self::Confirm {
            status: GATT_SUCCESS,
        }
    }
}

/// Driver primitive recorded by the fake, in call order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FakeCall {
    BeginScan(Option<String>),
    EndScan,
    Connect(PeripheralId),
    Disconnect(PeripheralId),
    Release(PeripheralId),
    DiscoverServices(PeripheralId),
    DiscoverCharacteristics(PeripheralId, String),
    SetNotification(GattTarget, bool),
    WriteDescriptor(GattTarget, Vec<u8>),
    Write(GattTarget, Vec<u8>, WriteMode),
    Read(GattTarget),
}

/// Settings for a [`FakeDriver`].
#[derive(Debug, Clone, Builder)]
pub struct FakeDriverConfig {
    #[builder(default = true)]
    radio_ready: bool,
    #[builder(default = true)]
    permissions_granted: bool,
    #[builder(default = true)]
    location_enabled: bool,
    /// Replayed each time a scan begins.
    #[builder(default, into)]
    advertisements: Vec<Advertisement>,
    #[builder(default = default_services())]
    services: Vec<DriverService>,
    /// Reports the service list first, then each service's characteristics.
    #[builder(default)]
    enumerate_per_service: bool,
    /// Services whose characteristics are never reported.
    #[builder(default)]
    withheld_services: Vec<String>,
    /// Emits a discovery failure instead of a service list.
    discovery_failure: Option<String>,
    /// Answers a connect request with `Connected`.
    #[builder(default = true)]
    auto_connect: bool,
    #[builder(default)]
    reject_connect: bool,
    #[builder(default)]
    reject_disconnect: bool,
    /// Read values in order; the last one repeats.
    #[builder(default)]
    read_values: Vec<Vec<u8>>,
    /// Leaves reads unanswered.
    #[builder(default)]
    withhold_reads: bool,
    #[builder(default)]
    write_behaviour: FakeWriteBehaviour,
    /// Values pushed after notifications are enabled.
    #[builder(default)]
    notifications: Vec<Vec<u8>>,
}

impl Default for FakeDriverConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug)]
struct FakeState {
    events: Option<DriverEvents>,
    read_values: VecDeque<Vec<u8>>,
    calls: Vec<FakeCall>,
}

/// In-memory driver for tests and hardware-free runs.
#[derive(Debug)]
pub struct FakeDriver {
    config: FakeDriverConfig,
    sink: DriverEventSink,
    state: Mutex<FakeState>,
}

impl FakeDriver {
    #[must_use]
    pub fn new(config: FakeDriverConfig) -> Self {
        let (sink, events) = mpsc::unbounded_channel();
        let read_values = config.read_values.iter().cloned().collect();
        Self {
            config,
            sink,
            state: Mutex::new(FakeState {
                events: Some(events),
                read_values,
                calls: Vec::new(),
            }),
        }
    }

    /// Delivers an arbitrary callback as if the platform raised it.
    pub fn inject(&self, event: DriverEvent) {
        self.emit(event);
    }

    /// Reports a radio power change.
    pub fn set_radio_state(&self, state: RadioState) {
        self.emit(DriverEvent::RadioState(state));
    }

    #[must_use]
    pub fn calls(&self) -> Vec<FakeCall> {
        self.lock().calls.clone()
    }

    /// Characteristic writes in submission order.
    #[must_use]
    pub fn writes(&self) -> Vec<(GattTarget, Vec<u8>, WriteMode)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                FakeCall::Write(target, payload, mode) => Some((target, payload, mode)),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn release_count(&self, peripheral: &PeripheralId) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, FakeCall::Release(released) if released == peripheral))
            .count()
    }

    fn emit(&self, event: DriverEvent) {
        trace!(?event, "fake driver event");
        if self.sink.send(event).is_err() {
            debug!("fake driver events have no listener");
        }
    }

    fn record(&self, call: FakeCall) {
        self.lock().calls.push(call);
    }

    fn next_read_value(&self) -> Option<Vec<u8>> {
        let mut state = self.lock();
        if state.read_values.len() > 1 {
            state.read_values.pop_front()
        } else {
            state.read_values.front().cloned()
        }
    }

    fn find_service(&self, uuid: &str) -> Option<&DriverService> {
        self.config
            .services
            .iter()
            .find(|service| uuid_matches(&service.uuid, uuid))
    }

    fn find_characteristic(&self, target: &GattTarget) -> Option<&DriverCharacteristic> {
        self.find_service(target.service_uuid())?
            .characteristics
            .as_deref()?
            .iter()
            .find(|characteristic| {
                uuid_matches(&characteristic.uuid, target.characteristic_uuid())
            })
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new(FakeDriverConfig::default())
    }
}

#[async_trait]
impl RadioPreconditions for FakeDriver {
    async fn radio_is_ready(&self) -> bool {
        self.config.radio_ready
    }

    async fn has_required_permissions(&self) -> bool {
        self.config.permissions_granted
    }

    async fn location_services_enabled(&self) -> bool {
        self.config.location_enabled
    }
}

#[async_trait]
impl BleDriver for FakeDriver {
    async fn events(&self) -> Result<DriverEvents, DriverError> {
        self.lock()
            .events
            .take()
            .ok_or(DriverError::EventsAlreadyTaken)
    }

    async fn begin_scan(&self, filter_hint: Option<&str>) -> Result<(), DriverError> {
        self.record(FakeCall::BeginScan(filter_hint.map(str::to_string)));
        for advertisement in &self.config.advertisements {
            self.emit(DriverEvent::Advertisement(advertisement.clone()));
        }
        Ok(())
    }

    async fn end_scan(&self) -> Result<(), DriverError> {
        self.record(FakeCall::EndScan);
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralId) -> Result<(), DriverError> {
        self.record(FakeCall::Connect(peripheral.clone()));
        if self.config.reject_connect {
            return Err(DriverError::Rejected {
                reason: "fake driver refuses connections".to_string(),
            });
        }
        if self.config.auto_connect {
            self.emit(DriverEvent::Connected(peripheral.clone()));
        }
        Ok(())
    }

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<(), DriverError> {
        self.record(FakeCall::Disconnect(peripheral.clone()));
        if self.config.reject_disconnect {
            return Err(DriverError::Rejected {
                reason: "fake driver refuses to disconnect".to_string(),
            });
        }
        self.emit(DriverEvent::Disconnected(peripheral.clone()));
        Ok(())
    }

    async fn release(&self, peripheral: &PeripheralId) {
        self.record(FakeCall::Release(peripheral.clone()));
    }

    async fn discover_services(&self, peripheral: &PeripheralId) -> Result<(), DriverError> {
        self.record(FakeCall::DiscoverServices(peripheral.clone()));
        if let Some(reason) = &self.config.discovery_failure {
            self.emit(DriverEvent::ServiceDiscoveryFailed {
                peripheral: peripheral.clone(),
                reason: reason.clone(),
            });
            return Ok(());
        }

        let services = if self.config.enumerate_per_service {
            self.config
                .services
                .iter()
                .map(|service| DriverService {
                    characteristics: None,
                    ..service.clone()
                })
                .collect()
        } else {
            self.config.services.clone()
        };
        self.emit(DriverEvent::ServicesDiscovered {
            peripheral: peripheral.clone(),
            services,
        });
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service_uuid: &str,
    ) -> Result<(), DriverError> {
        self.record(FakeCall::DiscoverCharacteristics(
            peripheral.clone(),
            service_uuid.to_string(),
        ));
        let service = self
            .find_service(service_uuid)
            .ok_or_else(|| DriverError::UnknownAttribute {
                peripheral: peripheral.clone(),
                uuid: service_uuid.to_string(),
            })?;
        if self
            .config
            .withheld_services
            .iter()
            .any(|withheld| uuid_matches(withheld, service_uuid))
        {
            debug!(service_uuid, "withholding characteristics");
            return Ok(());
        }

        self.emit(DriverEvent::CharacteristicsDiscovered {
            peripheral: peripheral.clone(),
            service_uuid: service.uuid.clone(),
            characteristics: service.characteristics.clone().unwrap_or_default(),
        });
        Ok(())
    }

    async fn set_characteristic_notification(
        &self,
        target: &GattTarget,
        enable: bool,
    ) -> Result<(), DriverError> {
        self.record(FakeCall::SetNotification(target.clone(), enable));
        if self.find_characteristic(target).is_none() {
            return Err(DriverError::UnknownAttribute {
                peripheral: target.peripheral().clone(),
                uuid: target.characteristic_uuid().to_string(),
            });
        }
        if enable {
            for value in &self.config.notifications {
                self.emit(DriverEvent::ValueUpdated {
                    target: target.clone(),
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }

    async fn write_descriptor(
        &self,
        target: &GattTarget,
        descriptor_uuid: &str,
        payload: &[u8],
    ) -> Result<(), DriverError> {
        self.record(FakeCall::WriteDescriptor(target.clone(), payload.to_vec()));
        let has_cccd = uuid_matches(descriptor_uuid, CCCD_UUID)
            && self.find_characteristic(target).is_some_and(|characteristic| {
                characteristic
                    .capabilities
                    .iter()
                    .any(|capability| {
                        matches!(capability, Capability::Notify | Capability::Indicate)
                    })
            });
        if !has_cccd {
            return Err(DriverError::DescriptorNotFound {
                uuid: canonical_uuid(descriptor_uuid),
            });
        }
        Ok(())
    }

    async fn write_characteristic(
        &self,
        target: &GattTarget,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<WriteSubmission, DriverError> {
        self.record(FakeCall::Write(target.clone(), payload.to_vec(), mode));
        if mode == WriteMode::WithoutResponse {
            return Ok(WriteSubmission::Accepted);
        }
        match self.config.write_behaviour {
            FakeWriteBehaviour::Accept => Ok(WriteSubmission::Accepted),
            FakeWriteBehaviour::Confirm { status } => {
                self.emit(DriverEvent::WriteConfirmed {
                    target: target.clone(),
                    status,
                });
                Ok(WriteSubmission::AwaitConfirmation)
            }
            FakeWriteBehaviour::Withhold => Ok(WriteSubmission::AwaitConfirmation),
        }
    }

    async fn read_characteristic(&self, target: &GattTarget) -> Result<(), DriverError> {
        self.record(FakeCall::Read(target.clone()));
        if self.config.withhold_reads {
            return Ok(());
        }
        match self.next_read_value() {
            Some(value) => self.emit(DriverEvent::ValueUpdated {
                target: target.clone(),
                value,
            }),
            None => self.emit(DriverEvent::ReadFailed {
                target: target.clone(),
                reason: "no fake read value configured".to_string(),
            }),
        }
        Ok(())
    }
}

fn parse_scan_record(raw_record: &str) -> Result<Advertisement, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    let [id, name, rssi] = fields.as_slice() else {
        return Err(FixtureError::InvalidRecordFieldCount);
    };
    if id.is_empty() || name.is_empty() || rssi.is_empty() {
        return Err(FixtureError::EmptyRecordField);
    }

    Ok(Advertisement {
        peripheral: PeripheralId::new(*id),
        name: (*name != "-").then(|| (*name).to_string()),
        rssi: rssi.parse()?,
        service_hints: Vec::new(),
    })
}

/// Services exposed by the fake when none are configured.
#[must_use]
pub fn default_services() -> Vec<DriverService> {
    vec![
        DriverService {
            uuid: DEVICE_INFORMATION_SERVICE_UUID.to_string(),
            primary: true,
            characteristics: Some(vec![DriverCharacteristic {
                uuid: MANUFACTURER_NAME_UUID.to_string(),
                capabilities: vec![Capability::Read],
            }]),
        },
        DriverService {
            uuid: FAKE_SERVICE_UUID.to_string(),
            primary: true,
            characteristics: Some(vec![
                DriverCharacteristic {
                    uuid: FAKE_NOTIFY_CHARACTERISTIC_UUID.to_string(),
                    capabilities: vec![Capability::Read, Capability::Notify],
                },
                DriverCharacteristic {
                    uuid: FAKE_WRITE_CHARACTERISTIC_UUID.to_string(),
                    capabilities: vec![Capability::Write, Capability::WriteWithoutResponse],
                },
            ]),
        },
    ]
}
