mod config;
mod connection;
mod events;
mod queue;
mod registry;
mod scan;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, trace, warn};

pub use self::config::CentralConfig;
use self::connection::{
    ConnectionArena, ConnectionContext, ConnectionHandle, ConnectionInput, notification,
};
pub use self::events::{BleEvent, EventStream, ScannedDevice};
use self::events::EventEmitter;
use self::queue::{GattRequest, Operation};
use self::registry::DeviceRegistry;
use self::scan::ScanSession;
use crate::error::{ConnectError, DisconnectError, DriverError, OperationError, ScanError};
use crate::hw::{
    BleDriver, CharacteristicInfo, ConnectionState, DiscoveredPeripheral, DriverEvent,
    DriverEvents, PeripheralId, ServiceInfo, find_service,
};

#[derive(Debug)]
struct CentralInner {
    driver: Arc<dyn BleDriver>,
    config: CentralConfig,
    registry: DeviceRegistry,
    scan: ScanSession,
    emitter: EventEmitter,
    connections: ConnectionContext,
    next_serial: AtomicU64,
    dispatcher: CancellationToken,
}

/// Central-role BLE client over a [`BleDriver`].
///
/// Cloning is cheap and every clone drives the same radio.
#[derive(Debug, Clone)]
pub struct Central {
    inner: Arc<CentralInner>,
}

impl Central {
    /// Takes the driver's event stream and starts routing callbacks.
    ///
    /// # Errors
    ///
    /// Returns an error when the driver's event stream was already taken.
    #[instrument(skip(driver), level = "debug")]
    pub async fn start(
        driver: Arc<dyn BleDriver>,
        config: CentralConfig,
    ) -> Result<Self, DriverError> {
        let events = driver.events().await?;
        let registry = DeviceRegistry::default();
        let emitter = EventEmitter::default();
        let scan = ScanSession::new(
            Arc::clone(&driver),
            registry.clone(),
            emitter.clone(),
            config.rssi_change_threshold(),
        );
        let connections = ConnectionContext {
            driver: Arc::clone(&driver),
            emitter: emitter.clone(),
            arena: ConnectionArena::default(),
            discovery_timeout: config.discovery_timeout(),
        };
        let dispatcher = CancellationToken::new();

        tokio::spawn(
            route_driver_events(
                events,
                scan.clone(),
                connections.clone(),
                dispatcher.clone(),
            )
            .instrument(info_span!("driver_events")),
        );

        Ok(Self {
            inner: Arc::new(CentralInner {
                driver,
                config,
                registry,
                scan,
                emitter,
                connections,
                next_serial: AtomicU64::new(1),
                dispatcher,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> CentralConfig {
        self.inner.config
    }

    /// Replaces the event subscriber. The previous stream, if any, ends.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        self.inner.emitter.subscribe()
    }

    pub fn unsubscribe(&self) {
        self.inner.emitter.unsubscribe();
    }

    /// Starts a scan that stops itself after `timeout`.
    ///
    /// Starting while a scan is active succeeds without restarting it.
    ///
    /// # Errors
    ///
    /// Returns an error when a radio precondition fails or the driver
    /// refuses to scan.
    pub async fn start_scan(
        &self,
        name_filter: Option<&str>,
        timeout: Duration,
    ) -> Result<(), ScanError> {
        self.inner.scan.start(name_filter, timeout).await
    }

    /// # Errors
    ///
    /// Returns an error when the driver fails to stop scanning. The session
    /// is idle afterwards regardless.
    pub async fn stop_scan(&self) -> Result<(), ScanError> {
        self.inner.scan.stop().await
    }

    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.inner.scan.is_scanning()
    }

    /// Peripherals seen during the current scan session, in first-seen order.
    #[must_use]
    pub fn discovered_devices(&self) -> Vec<DiscoveredPeripheral> {
        self.inner.registry.snapshot()
    }

    /// Opens a connection to a previously discovered peripheral.
    ///
    /// Returns once the connect request is issued. Progress is reported via
    /// `connectionState` events. Connecting to a peripheral with a live
    /// connection is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::DeviceNotFound`] for ids never seen by a scan
    /// and [`ConnectError::ConnectionFailed`] when the driver refuses.
    #[instrument(skip(self), fields(peripheral = %id))]
    pub async fn connect(&self, id: &PeripheralId) -> Result<(), ConnectError> {
        if !self.inner.registry.is_known(id) {
            return Err(ConnectError::DeviceNotFound {
                peripheral: id.clone(),
            });
        }

        let serial = self.inner.next_serial.fetch_add(1, Ordering::Relaxed);
        let Some(handle) = connection::open(&self.inner.connections, id, serial) else {
            return Ok(());
        };
        self.inner.registry.remember(id);

        if let Err(source) = self.inner.driver.connect(id).await {
            warn!(error = ?source, "driver refused to connect");
            let _ = handle.send(ConnectionInput::Teardown(ConnectionState::Failed));
            return Err(ConnectError::ConnectionFailed {
                peripheral: id.clone(),
                source,
            });
        }
        info!("connect requested");
        Ok(())
    }

    /// Requests the link to close. Unknown or closed connections succeed.
    ///
    /// # Errors
    ///
    /// Returns an error when the driver rejects the request; the connection
    /// is torn down locally anyway.
    #[instrument(skip(self), fields(peripheral = %id))]
    pub async fn disconnect(&self, id: &PeripheralId) -> Result<(), DisconnectError> {
        let Some(handle) = self.inner.connections.arena.live(id) else {
            trace!("no live connection to close");
            return Ok(());
        };
        if handle.state() == ConnectionState::Disconnecting {
            return Ok(());
        }

        let _ = handle.send(ConnectionInput::Disconnecting);
        if let Err(source) = self.inner.driver.disconnect(id).await {
            warn!(error = ?source, "driver refused to disconnect");
            let _ = handle.send(ConnectionInput::Teardown(ConnectionState::Disconnected));
            return Err(DisconnectError::Driver {
                peripheral: id.clone(),
                source,
            });
        }
        info!("disconnect requested");
        Ok(())
    }

    /// Current state of the connection to `id`, if one is live.
    #[must_use]
    pub fn connection_state(&self, id: &PeripheralId) -> Option<ConnectionState> {
        self.inner
            .connections
            .arena
            .get(id)
            .map(|handle| handle.state())
    }

    /// Enumerates services and characteristics, replacing any earlier result.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection is not usable, when the driver
    /// fails, or when enumeration outlives the discovery timeout.
    #[instrument(skip(self), fields(peripheral = %id))]
    pub async fn discover_services(
        &self,
        id: &PeripheralId,
    ) -> Result<Vec<ServiceInfo>, OperationError> {
        let (responder, receiver) = oneshot::channel();
        self.submit(
            id,
            Operation::Discover {
                responders: vec![responder],
            },
        )?;
        receiver.await.unwrap_or(Err(OperationError::Cancelled))
    }

    /// Reads a characteristic value.
    ///
    /// # Errors
    ///
    /// Returns an error when the characteristic cannot be resolved or the
    /// read fails.
    #[instrument(skip(self), fields(peripheral = %id))]
    pub async fn read(
        &self,
        id: &PeripheralId,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<Vec<u8>, OperationError> {
        let (responder, receiver) = oneshot::channel();
        self.submit(
            id,
            Operation::Read {
                request: GattRequest::new(service_uuid, characteristic_uuid),
                responder,
            },
        )?;
        receiver.await.unwrap_or(Err(OperationError::Cancelled))
    }

    /// Writes a characteristic value, acknowledged when the characteristic allows it.
    ///
    /// # Errors
    ///
    /// Returns an error when the characteristic cannot be resolved or the
    /// peripheral reports a failure status.
    #[instrument(skip(self, payload), fields(peripheral = %id, len = payload.len()))]
    pub async fn write(
        &self,
        id: &PeripheralId,
        service_uuid: &str,
        characteristic_uuid: &str,
        payload: &[u8],
    ) -> Result<(), OperationError> {
        let (responder, receiver) = oneshot::channel();
        self.submit(
            id,
            Operation::Write {
                request: GattRequest::new(service_uuid, characteristic_uuid),
                payload: payload.to_vec(),
                responder,
            },
        )?;
        receiver.await.unwrap_or(Err(OperationError::Cancelled))
    }

    /// Enables or disables value updates for a characteristic.
    ///
    /// # Errors
    ///
    /// Returns an error when the characteristic cannot be resolved or the
    /// driver refuses the subscription change.
    #[instrument(skip(self), fields(peripheral = %id))]
    pub async fn set_notify(
        &self,
        id: &PeripheralId,
        service_uuid: &str,
        characteristic_uuid: &str,
        enable: bool,
    ) -> Result<(), OperationError> {
        let (responder, receiver) = oneshot::channel();
        self.submit(
            id,
            Operation::SetNotify {
                request: GattRequest::new(service_uuid, characteristic_uuid),
                enable,
                responder,
            },
        )?;
        receiver.await.unwrap_or(Err(OperationError::Cancelled))
    }

    /// Looks up a characteristic in the last completed discovery.
    ///
    /// # Errors
    ///
    /// Returns an error when there is no live connection or the service or
    /// characteristic is absent.
    pub fn find_characteristic(
        &self,
        id: &PeripheralId,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<CharacteristicInfo, OperationError> {
        let handle = self.live_connection(id)?;
        let request = GattRequest::new(service_uuid, characteristic_uuid);
        let services = handle.services();
        let service = services
            .as_deref()
            .and_then(|services| find_service(services, &request.service_uuid))
            .ok_or_else(|| OperationError::ServiceNotFound {
                service_uuid: request.service_uuid.clone(),
            })?;
        service
            .characteristic(&request.characteristic_uuid)
            .cloned()
            .ok_or(OperationError::CharacteristicNotFound {
                service_uuid: request.service_uuid,
                characteristic_uuid: request.characteristic_uuid,
            })
    }

    /// Stops scanning, closes every connection, and forgets every peripheral.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        if let Err(error) = self.inner.scan.stop().await {
            warn!(?error, "failed to stop scan during shutdown");
        }
        for (id, handle) in self.inner.connections.arena.handles() {
            if handle.state().is_terminal() {
                continue;
            }
            if let Err(error) = self.inner.driver.disconnect(&id).await {
                debug!(peripheral = %id, ?error, "disconnect during shutdown failed");
            }
            let _ = handle.send(ConnectionInput::Teardown(ConnectionState::Disconnected));
        }
        self.inner.registry.reset();
        info!("central shut down");
    }

    fn live_connection(&self, id: &PeripheralId) -> Result<ConnectionHandle, OperationError> {
        self.inner
            .connections
            .arena
            .live(id)
            .ok_or_else(|| OperationError::NotConnected {
                peripheral: id.clone(),
            })
    }

    fn submit(&self, id: &PeripheralId, operation: Operation) -> Result<(), OperationError> {
        let handle = self.live_connection(id)?;
        handle
            .send(ConnectionInput::Submit(operation))
            .map_err(|_| OperationError::NotConnected {
                peripheral: id.clone(),
            })
    }
}

impl Drop for CentralInner {
    fn drop(&mut self) {
        self.dispatcher.cancel();
        // Actors keep the arena alive, so their input channels never close on their own.
        for (_, handle) in self.connections.arena.handles() {
            let _ = handle.send(ConnectionInput::Teardown(ConnectionState::Disconnected));
        }
    }
}

/// Routes driver callbacks to the scan session and connection actors.
async fn route_driver_events(
    mut events: DriverEvents,
    scan: ScanSession,
    connections: ConnectionContext,
    stop: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = stop.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            debug!("driver event stream closed");
            break;
        };

        match event {
            DriverEvent::Advertisement(advertisement) => scan.on_advertisement(advertisement),
            DriverEvent::ScanFailed { code, message } => scan.on_scan_failed(code, message),
            DriverEvent::RadioState(state) => {
                debug!(%state, "radio state changed");
                connections.emitter.emit(BleEvent::BluetoothState { state });
            }
            event => route_to_connection(&connections, event),
        }
    }
}

fn route_to_connection(connections: &ConnectionContext, event: DriverEvent) {
    let Some(peripheral) = event.peripheral().cloned() else {
        return;
    };
    let event = match connections.arena.get(&peripheral) {
        Some(handle) => match handle.send(ConnectionInput::Driver(event)) {
            Ok(()) => return,
            Err(rejected) => match rejected.0 {
                ConnectionInput::Driver(event) => event,
                _ => return,
            },
        },
        None => event,
    };

    match event {
        DriverEvent::ValueUpdated { target, value } => {
            connections.emitter.emit(notification(target, value));
        }
        event => trace!(%peripheral, ?event, "dropping event without a connection"),
    }
}
