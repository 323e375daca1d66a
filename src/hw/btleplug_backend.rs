use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use btleplug::api::{
    Central as _, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, PeripheralProperties, ScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, trace, warn};

use super::driver::{
    Advertisement, BleDriver, DriverCharacteristic, DriverEvent, DriverEventSink, DriverEvents,
    DriverService, GATT_SUCCESS, GattTarget, RadioPreconditions, WriteMode, WriteSubmission,
};
use super::model::{Capability, PeripheralId, RadioState, uuid_matches};
use crate::error::DriverError;

/// Status reported for a failed acknowledged write (`GATT_ERROR`).
const GATT_ERROR_STATUS: i32 = 0x85;
/// RSSI reported when the platform omitted one.
const UNKNOWN_RSSI: i16 = -127;

#[derive(Debug, Default)]
struct Peripherals {
    known: HashMap<PeripheralId, Peripheral>,
    notification_pumps: HashMap<PeripheralId, CancellationToken>,
}

/// Driver backed by the first `btleplug` adapter.
#[derive(Debug)]
pub struct BtleplugDriver {
    adapter: Adapter,
    sink: DriverEventSink,
    events: Mutex<Option<DriverEvents>>,
    peripherals: Arc<Mutex<Peripherals>>,
    shutdown: CancellationToken,
}

impl BtleplugDriver {
    /// Opens the first adapter and starts forwarding its events.
    ///
    /// # Errors
    ///
    /// Returns an error when no adapter is present or the platform refuses
    /// to hand out an event stream.
    #[instrument(level = "debug")]
    pub async fn new() -> Result<Self, DriverError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(DriverError::NoAdapters)?;
        match adapter.adapter_info().await {
            Ok(name) => info!(adapter = %name, "using BLE adapter"),
            Err(error) => debug!(?error, "adapter info unavailable"),
        }

        let (sink, events) = mpsc::unbounded_channel();
        let driver = Self {
            adapter,
            sink,
            events: Mutex::new(Some(events)),
            peripherals: Arc::default(),
            shutdown: CancellationToken::new(),
        };
        driver.spawn_adapter_events().await?;
        Ok(driver)
    }

    async fn spawn_adapter_events(&self) -> Result<(), DriverError> {
        let mut adapter_events = self.adapter.events().await?;
        let adapter = self.adapter.clone();
        let sink = self.sink.clone();
        let peripherals = Arc::clone(&self.peripherals);
        let shutdown = self.shutdown.clone();

        tokio::spawn(
            async move {
                loop {
                    let event = tokio::select! {
                        () = shutdown.cancelled() => break,
                        event = adapter_events.next() => event,
                    };
                    let Some(event) = event else {
                        debug!("adapter event stream ended");
                        break;
                    };
                    let translated = translate_adapter_event(&adapter, &peripherals, event).await;
                    if let Some(event) = translated
                        && sink.send(event).is_err()
                    {
                        break;
                    }
                }
            }
            .instrument(info_span!("adapter_events")),
        );
        Ok(())
    }

    async fn peripheral(&self, id: &PeripheralId) -> Result<Peripheral, DriverError> {
        if let Some(peripheral) = lock(&self.peripherals).known.get(id).cloned() {
            return Ok(peripheral);
        }
        let peripheral = self
            .adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|peripheral| peripheral.id().to_string() == id.as_str())
            .ok_or_else(|| DriverError::UnknownPeripheral {
                peripheral: id.clone(),
            })?;
        lock(&self.peripherals)
            .known
            .insert(id.clone(), peripheral.clone());
        Ok(peripheral)
    }

    async fn characteristic(
        &self,
        target: &GattTarget,
    ) -> Result<(Peripheral, Characteristic), DriverError> {
        let peripheral = self.peripheral(target.peripheral()).await?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|characteristic| {
                uuid_matches(&characteristic.service_uuid.to_string(), target.service_uuid())
                    && uuid_matches(&characteristic.uuid.to_string(), target.characteristic_uuid())
            })
            .ok_or_else(|| DriverError::UnknownAttribute {
                peripheral: target.peripheral().clone(),
                uuid: target.characteristic_uuid().to_string(),
            })?;
        Ok((peripheral, characteristic))
    }
}

impl Drop for BtleplugDriver {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl RadioPreconditions for BtleplugDriver {
    async fn radio_is_ready(&self) -> bool {
        match self.adapter.adapter_state().await {
            Ok(state) => state != CentralState::PoweredOff,
            Err(error) => {
                debug!(?error, "adapter state unavailable");
                true
            }
        }
    }

    async fn has_required_permissions(&self) -> bool {
        // Desktop stacks prompt on first use rather than exposing a query.
        true
    }
}

#[async_trait]
impl BleDriver for BtleplugDriver {
    async fn events(&self) -> Result<DriverEvents, DriverError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(DriverError::EventsAlreadyTaken)
    }

    #[instrument(skip(self), level = "debug")]
    async fn begin_scan(&self, filter_hint: Option<&str>) -> Result<(), DriverError> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn end_scan(&self) -> Result<(), DriverError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(peripheral = %id))]
    async fn connect(&self, id: &PeripheralId) -> Result<(), DriverError> {
        let peripheral = self.peripheral(id).await?;
        let sink = self.sink.clone();
        let peripherals = Arc::clone(&self.peripherals);
        let id = id.clone();
        let span = info_span!("connect", peripheral = %id);
        tokio::spawn(
            async move {
                if let Err(error) = peripheral.connect().await {
                    let _ = sink.send(DriverEvent::ConnectFailed {
                        peripheral: id,
                        reason: error.to_string(),
                    });
                    return;
                }
                start_notification_pump(&sink, &peripherals, &id, &peripheral).await;
                let _ = sink.send(DriverEvent::Connected(id));
            }
            .instrument(span),
        );
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(peripheral = %id))]
    async fn disconnect(&self, id: &PeripheralId) -> Result<(), DriverError> {
        let peripheral = self.peripheral(id).await?;
        let sink = self.sink.clone();
        let id = id.clone();
        tokio::spawn(async move {
            if let Err(error) = peripheral.disconnect().await {
                debug!(?error, "disconnect failed, reporting link as closed");
            }
            let _ = sink.send(DriverEvent::Disconnected(id));
        });
        Ok(())
    }

    async fn release(&self, id: &PeripheralId) {
        if let Some(pump) = lock(&self.peripherals).notification_pumps.remove(id) {
            pump.cancel();
        }
    }

    #[instrument(skip(self), level = "debug", fields(peripheral = %id))]
    async fn discover_services(&self, id: &PeripheralId) -> Result<(), DriverError> {
        let peripheral = self.peripheral(id).await?;
        let sink = self.sink.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let event = match peripheral.discover_services().await {
                Ok(()) => DriverEvent::ServicesDiscovered {
                    peripheral: id,
                    services: peripheral.services().iter().map(driver_service).collect(),
                },
                Err(error) => DriverEvent::ServiceDiscoveryFailed {
                    peripheral: id,
                    reason: error.to_string(),
                },
            };
            let _ = sink.send(event);
        });
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        id: &PeripheralId,
        service_uuid: &str,
    ) -> Result<(), DriverError> {
        let peripheral = self.peripheral(id).await?;
        let service = peripheral
            .services()
            .into_iter()
            .find(|service| uuid_matches(&service.uuid.to_string(), service_uuid))
            .ok_or_else(|| DriverError::UnknownAttribute {
                peripheral: id.clone(),
                uuid: service_uuid.to_string(),
            })?;
        let _ = self.sink.send(DriverEvent::CharacteristicsDiscovered {
            peripheral: id.clone(),
            service_uuid: service.uuid.to_string(),
            characteristics: driver_characteristics(&service),
        });
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn set_characteristic_notification(
        &self,
        target: &GattTarget,
        enable: bool,
    ) -> Result<(), DriverError> {
        let (peripheral, characteristic) = self.characteristic(target).await?;
        if enable {
            peripheral.subscribe(&characteristic).await?;
        } else {
            peripheral.unsubscribe(&characteristic).await?;
        }
        Ok(())
    }

    async fn write_descriptor(
        &self,
        target: &GattTarget,
        descriptor_uuid: &str,
        payload: &[u8],
    ) -> Result<(), DriverError> {
        let (peripheral, characteristic) = self.characteristic(target).await?;
        let descriptor = characteristic
            .descriptors
            .iter()
            .find(|descriptor| uuid_matches(&descriptor.uuid.to_string(), descriptor_uuid))
            .ok_or_else(|| DriverError::DescriptorNotFound {
                uuid: descriptor_uuid.to_string(),
            })?;
        peripheral.write_descriptor(descriptor, payload).await?;
        Ok(())
    }

    #[instrument(skip(self, payload), level = "debug", fields(len = payload.len()))]
    async fn write_characteristic(
        &self,
        target: &GattTarget,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<WriteSubmission, DriverError> {
        let (peripheral, characteristic) = self.characteristic(target).await?;
        if mode == WriteMode::WithoutResponse {
            peripheral
                .write(&characteristic, payload, WriteType::WithoutResponse)
                .await?;
            return Ok(WriteSubmission::Accepted);
        }

        let sink = self.sink.clone();
        let target = target.clone();
        let payload = payload.to_vec();
        tokio::spawn(async move {
            let status = match peripheral
                .write(&characteristic, &payload, WriteType::WithResponse)
                .await
            {
                Ok(()) => GATT_SUCCESS,
                Err(error) => {
                    debug!(?error, "acknowledged write failed");
                    GATT_ERROR_STATUS
                }
            };
            let _ = sink.send(DriverEvent::WriteConfirmed { target, status });
        });
        Ok(WriteSubmission::AwaitConfirmation)
    }

    #[instrument(skip(self), level = "debug")]
    async fn read_characteristic(&self, target: &GattTarget) -> Result<(), DriverError> {
        let (peripheral, characteristic) = self.characteristic(target).await?;
        let sink = self.sink.clone();
        let target = target.clone();
        tokio::spawn(async move {
            let event = match peripheral.read(&characteristic).await {
                Ok(value) => DriverEvent::ValueUpdated { target, value },
                Err(error) => DriverEvent::ReadFailed {
                    target,
                    reason: error.to_string(),
                },
            };
            let _ = sink.send(event);
        });
        Ok(())
    }
}

async fn translate_adapter_event(
    adapter: &Adapter,
    peripherals: &Mutex<Peripherals>,
    event: CentralEvent,
) -> Option<DriverEvent> {
    match event {
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
            let peripheral = adapter.peripheral(&id).await.ok()?;
            let properties = peripheral.properties().await.ok().flatten()?;
            let peripheral_id = PeripheralId::new(id.to_string());
            lock(peripherals)
                .known
                .insert(peripheral_id.clone(), peripheral);
            Some(DriverEvent::Advertisement(advertisement(
                peripheral_id,
                properties,
            )))
        }
        CentralEvent::DeviceDisconnected(id) => Some(DriverEvent::Disconnected(PeripheralId::new(
            id.to_string(),
        ))),
        CentralEvent::StateUpdate(state) => Some(DriverEvent::RadioState(radio_state(state))),
        other => {
            trace!(?other, "ignoring adapter event");
            None
        }
    }
}

/// Forwards characteristic values for one connected peripheral.
async fn start_notification_pump(
    sink: &DriverEventSink,
    peripherals: &Mutex<Peripherals>,
    id: &PeripheralId,
    peripheral: &Peripheral,
) {
    let token = CancellationToken::new();
    if let Some(previous) = lock(peripherals)
        .notification_pumps
        .insert(id.clone(), token.clone())
    {
        previous.cancel();
    }

    let mut notifications = match peripheral.notifications().await {
        Ok(notifications) => notifications,
        Err(error) => {
            warn!(?error, "notification stream unavailable");
            return;
        }
    };
    let characteristics = peripheral.characteristics();
    let sink = sink.clone();
    let id = id.clone();
    tokio::spawn(
        async move {
            loop {
                let notification = tokio::select! {
                    () = token.cancelled() => break,
                    notification = notifications.next() => notification,
                };
                let Some(notification) = notification else {
                    break;
                };
                let Some(service_uuid) = characteristics
                    .iter()
                    .find(|characteristic| characteristic.uuid == notification.uuid)
                    .map(|characteristic| characteristic.service_uuid.to_string())
                else {
                    trace!(uuid = %notification.uuid, "value for unknown characteristic");
                    continue;
                };
                let target =
                    GattTarget::new(id.clone(), &service_uuid, &notification.uuid.to_string());
                if sink
                    .send(DriverEvent::ValueUpdated {
                        target,
                        value: notification.value,
                    })
                    .is_err()
                {
                    break;
                }
            }
        }
        .instrument(info_span!("notifications")),
    );
}

fn advertisement(peripheral: PeripheralId, properties: PeripheralProperties) -> Advertisement {
    Advertisement {
        peripheral,
        name: properties.local_name,
        rssi: properties.rssi.unwrap_or(UNKNOWN_RSSI),
        service_hints: properties
            .services
            .iter()
            .map(ToString::to_string)
            .collect(),
    }
}

fn radio_state(state: CentralState) -> RadioState {
    match state {
        CentralState::PoweredOn => RadioState::PoweredOn,
        CentralState::PoweredOff => RadioState::PoweredOff,
        _ => RadioState::Unknown,
    }
}

fn driver_service(service: &Service) -> DriverService {
    DriverService {
        uuid: service.uuid.to_string(),
        primary: service.primary,
        characteristics: Some(driver_characteristics(service)),
    }
}

fn driver_characteristics(service: &Service) -> Vec<DriverCharacteristic> {
    service
        .characteristics
        .iter()
        .map(|characteristic| DriverCharacteristic {
            uuid: characteristic.uuid.to_string(),
            capabilities: capabilities(characteristic.properties),
        })
        .collect()
}

fn capabilities(flags: CharPropFlags) -> Vec<Capability> {
    [
        (CharPropFlags::READ, Capability::Read),
        (CharPropFlags::WRITE, Capability::Write),
        (
            CharPropFlags::WRITE_WITHOUT_RESPONSE,
            Capability::WriteWithoutResponse,
        ),
        (CharPropFlags::NOTIFY, Capability::Notify),
        (CharPropFlags::INDICATE, Capability::Indicate),
    ]
    .into_iter()
    .filter(|(flag, _)| flags.contains(*flag))
    .map(|(_, capability)| capability)
    .collect()
}

fn lock(peripherals: &Mutex<Peripherals>) -> MutexGuard<'_, Peripherals> {
    peripherals.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(CharPropFlags::READ, vec![Capability::Read])]
    #[case(
        CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE,
        vec![Capability::Write, Capability::WriteWithoutResponse]
    )]
    #[case(
        CharPropFlags::NOTIFY | CharPropFlags::INDICATE | CharPropFlags::READ,
        vec![Capability::Read, Capability::Notify, Capability::Indicate]
    )]
    #[case(CharPropFlags::BROADCAST, vec![])]
    fn capabilities_follow_property_flags(
        #[case] flags: CharPropFlags,
        #[case] expected: Vec<Capability>,
    ) {
        assert_eq!(expected, capabilities(flags));
    }

    #[test]
    fn missing_rssi_reports_floor_value() {
        let advertisement = advertisement("AA".into(), PeripheralProperties::default());
        assert_eq!(UNKNOWN_RSSI, advertisement.rssi);
        assert_eq!(None, advertisement.name);
    }
}
