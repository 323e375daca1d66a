use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{Instrument, debug, info, info_span, trace, warn};

use super::events::{BleEvent, EventEmitter};
use super::queue::{
    CorrelationKey, DiscoveryPass, GattRequest, InFlight, Operation, OperationKind,
    OperationQueue, Responder,
};
use crate::error::{DriverError, OperationError};
use crate::hw::{
    BleDriver, CCCD_DISABLE, CCCD_ENABLE_INDICATION, CCCD_ENABLE_NOTIFICATION, CCCD_UUID,
    Capability, CharacteristicInfo, ConnectionState, DriverCharacteristic, DriverEvent,
    DriverService, GATT_SUCCESS, GattTarget, PeripheralId, ServiceInfo, WriteMode,
    WriteSubmission, find_service,
};

/// Status reported when the driver refuses a write before it reaches the air.
pub(crate) const WRITE_REJECTED_STATUS: i32 = -1;

/// Everything a connection actor reacts to, in arrival order.
#[derive(Debug)]
pub(crate) enum ConnectionInput {
    Submit(Operation),
    Driver(DriverEvent),
    /// A disconnect was requested; the driver's `Disconnected` event follows.
    Disconnecting,
    /// Tear down locally without waiting for the driver.
    Teardown(ConnectionState),
}

/// State published by an actor for synchronous readers.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionSnapshot {
    pub(crate) state: ConnectionState,
    pub(crate) services: Option<Arc<[ServiceInfo]>>,
}

/// Caller-side view of one connection actor.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionHandle {
    serial: u64,
    inputs: mpsc::UnboundedSender<ConnectionInput>,
    snapshot: watch::Receiver<ConnectionSnapshot>,
}

impl ConnectionHandle {
    pub(crate) fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    pub(crate) fn services(&self) -> Option<Arc<[ServiceInfo]>> {
        self.snapshot.borrow().services.clone()
    }

    pub(crate) fn send(
        &self,
        input: ConnectionInput,
    ) -> Result<(), mpsc::error::SendError<ConnectionInput>> {
        self.inputs.send(input)
    }
}

/// Live connections keyed by peripheral.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConnectionArena {
    handles: Arc<Mutex<HashMap<PeripheralId, ConnectionHandle>>>,
}

impl ConnectionArena {
    pub(crate) fn get(&self, id: &PeripheralId) -> Option<ConnectionHandle> {
        self.lock().get(id).cloned()
    }

    /// Returns the handle unless its actor has reached a terminal state.
    pub(crate) fn live(&self, id: &PeripheralId) -> Option<ConnectionHandle> {
        self.get(id).filter(|handle| !handle.state().is_terminal())
    }

    pub(crate) fn handles(&self) -> Vec<(PeripheralId, ConnectionHandle)> {
        self.lock()
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect()
    }

    /// Removes the entry only if it still belongs to the actor with `serial`.
    fn remove(&self, id: &PeripheralId, serial: u64) -> bool {
        let mut handles = self.lock();
        if handles.get(id).is_some_and(|handle| handle.serial == serial) {
            handles.remove(id);
            return true;
        }
        false
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PeripheralId, ConnectionHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Collaborators shared by every connection actor.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionContext {
    pub(crate) driver: Arc<dyn BleDriver>,
    pub(crate) emitter: EventEmitter,
    pub(crate) arena: ConnectionArena,
    pub(crate) discovery_timeout: Duration,
}

/// Spawns a connection actor in `Connecting` unless a live one exists.
///
/// Returns `None` when an existing live connection was kept.
pub(crate) fn open(
    context: &ConnectionContext,
    id: &PeripheralId,
    serial: u64,
) -> Option<ConnectionHandle> {
    let mut handles = context.arena.lock();
    if let Some(existing) = handles.get(id)
        && !existing.state().is_terminal()
    {
        debug!(peripheral = %id, state = %existing.state(), "connection already live");
        return None;
    }

    let (inputs, receiver) = mpsc::unbounded_channel();
    let (publisher, snapshot) = watch::channel(ConnectionSnapshot {
        state: ConnectionState::Connecting,
        services: None,
    });
    let handle = ConnectionHandle {
        serial,
        inputs,
        snapshot,
    };
    handles.insert(id.clone(), handle.clone());
    drop(handles);

    let actor = ConnectionActor {
        id: id.clone(),
        serial,
        context: context.clone(),
        state: ConnectionState::Connecting,
        services: None,
        queue: OperationQueue::default(),
        publisher,
    };
    let span = info_span!("connection", peripheral = %id, serial);
    tokio::spawn(actor.run(receiver).instrument(span));
    Some(handle)
}

struct ConnectionActor {
    id: PeripheralId,
    serial: u64,
    context: ConnectionContext,
    state: ConnectionState,
    services: Option<Arc<[ServiceInfo]>>,
    queue: OperationQueue,
    publisher: watch::Sender<ConnectionSnapshot>,
}

impl ConnectionActor {
    async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<ConnectionInput>) {
        self.context
            .emitter
            .connection_state(&self.id, ConnectionState::Connecting);

        loop {
            let deadline = self.queue.discovery_deadline();
            tokio::select! {
                input = inputs.recv() => match input {
                    Some(input) => self.handle(input).await,
                    None => {
                        debug!("connection handle dropped");
                        self.terminate(ConnectionState::Disconnected).await;
                    }
                },
                () = wait_for(deadline) => self.fail_discovery(OperationError::DiscoveryTimeout),
            }

            if self.state.is_terminal() {
                break;
            }
            self.dispatch().await;
        }

        // Late submissions raced with teardown.
        inputs.close();
        while let Some(input) = inputs.recv().await {
            if let ConnectionInput::Submit(operation) = input {
                operation.fail(OperationError::Cancelled);
            }
        }
    }

    async fn handle(&mut self, input: ConnectionInput) {
        match input {
            ConnectionInput::Submit(operation) => self.submit(operation),
            ConnectionInput::Driver(event) => self.on_driver_event(event).await,
            ConnectionInput::Disconnecting => {
                if self.state != ConnectionState::Disconnecting {
                    self.transition(ConnectionState::Disconnecting);
                }
            }
            ConnectionInput::Teardown(state) => self.terminate(state).await,
        }
    }

    fn submit(&mut self, operation: Operation) {
        if !self.state.has_link() {
            debug!(kind = %operation.kind(), state = %self.state, "rejecting operation");
            operation.fail(OperationError::NotConnected {
                peripheral: self.id.clone(),
            });
            return;
        }
        self.queue.submit(operation);
    }

    async fn on_driver_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Connected(_) => {
                if self.state == ConnectionState::Connecting {
                    info!("connected");
                    self.transition(ConnectionState::Connected);
                } else {
                    trace!(state = %self.state, "ignoring duplicate connected callback");
                }
            }
            DriverEvent::ConnectFailed { reason, .. } => {
                warn!(%reason, "connection attempt failed");
                self.terminate(ConnectionState::Failed).await;
            }
            DriverEvent::Disconnected(_) => {
                info!("link closed");
                self.terminate(ConnectionState::Disconnected).await;
            }
            DriverEvent::ServicesDiscovered { services, .. } => {
                self.on_services_discovered(services).await;
            }
            DriverEvent::CharacteristicsDiscovered {
                service_uuid,
                characteristics,
                ..
            } => self.on_characteristics_discovered(&service_uuid, characteristics),
            DriverEvent::ServiceDiscoveryFailed { reason, .. } => {
                self.fail_discovery(OperationError::DiscoveryFailed { reason });
            }
            DriverEvent::ValueUpdated { target, value } => {
                if let Some(responder) = self.queue.take_read(&target) {
                    trace!(len = value.len(), "read completed");
                    let _ = responder.send(Ok(value));
                } else {
                    self.context.emitter.emit(notification(target, value));
                }
            }
            DriverEvent::ReadFailed { target, reason } => {
                if let Some(responder) = self.queue.take_read(&target) {
                    let _ = responder.send(Err(OperationError::ReadFailed { reason }));
                } else {
                    debug!(?target, %reason, "read failure without a pending read");
                }
            }
            DriverEvent::WriteConfirmed { target, status } => {
                if let Some(responder) = self.queue.take_write(&target) {
                    let result = if status == GATT_SUCCESS {
                        Ok(())
                    } else {
                        Err(OperationError::WriteFailed { status })
                    };
                    let _ = responder.send(result);
                } else {
                    debug!(?target, status, "write confirmation without a pending write");
                }
            }
            DriverEvent::Advertisement(_)
            | DriverEvent::ScanFailed { .. }
            | DriverEvent::RadioState(_) => {
                trace!("ignoring adapter-level event");
            }
        }
    }

    /// Starts queued operations until one has to wait on the driver.
    async fn dispatch(&mut self) {
        while self.state.has_link() {
            let Some(operation) = self.queue.next_ready() else {
                return;
            };
            match operation {
                Operation::Discover { responders } => self.start_discovery(responders).await,
                Operation::Read { request, responder } => {
                    let target = match self.resolve(&request) {
                        Ok((target, _)) => target,
                        Err(error) => {
                            let _ = responder.send(Err(error));
                            continue;
                        }
                    };
                    if let Err(error) = self.context.driver.read_characteristic(&target).await {
                        let _ = responder.send(Err(OperationError::ReadFailed {
                            reason: error.to_string(),
                        }));
                        continue;
                    }
                    self.queue.begin(InFlight::Read {
                        key: CorrelationKey::for_target(&target, OperationKind::Read),
                        responder,
                    });
                }
                Operation::Write {
                    request,
                    payload,
                    responder,
                } => {
                    let (target, characteristic) = match self.resolve(&request) {
                        Ok(resolved) => resolved,
                        Err(error) => {
                            let _ = responder.send(Err(error));
                            continue;
                        }
                    };
                    let mode = write_mode_for(&characteristic);
                    match self
                        .context
                        .driver
                        .write_characteristic(&target, &payload, mode)
                        .await
                    {
                        Ok(WriteSubmission::Accepted) => {
                            trace!(%mode, len = payload.len(), "write accepted");
                            let _ = responder.send(Ok(()));
                        }
                        Ok(WriteSubmission::AwaitConfirmation) => {
                            self.queue.begin(InFlight::Write {
                                key: CorrelationKey::for_target(&target, OperationKind::Write),
                                responder,
                            });
                        }
                        Err(error) => {
                            warn!(?error, "driver rejected write");
                            let _ = responder.send(Err(OperationError::WriteFailed {
                                status: WRITE_REJECTED_STATUS,
                            }));
                        }
                    }
                }
                Operation::SetNotify {
                    request,
                    enable,
                    responder,
                } => {
                    let result = self.set_notify(&request, enable).await;
                    let _ = responder.send(result);
                }
            }
        }
    }

    async fn start_discovery(&mut self, responders: Vec<Responder<Vec<ServiceInfo>>>) {
        self.transition(ConnectionState::DiscoveringServices);
        if let Err(error) = self.context.driver.discover_services(&self.id).await {
            warn!(?error, "driver refused service discovery");
            let reason = error.to_string();
            Operation::Discover { responders }.fail(OperationError::DiscoveryFailed { reason });
            self.transition(ConnectionState::Connected);
            return;
        }
        let deadline = Instant::now() + self.context.discovery_timeout;
        self.queue
            .begin(InFlight::Discover(DiscoveryPass::new(responders, deadline)));
    }

    async fn on_services_discovered(&mut self, services: Vec<DriverService>) {
        let Some(pass) = self.queue.discovery_mut() else {
            debug!("services reported without a discovery in flight");
            return;
        };
        if pass.has_services() {
            debug!("ignoring repeated service list");
            return;
        }

        let outstanding = pass.on_services(services);
        debug!(outstanding = outstanding.len(), "service list received");
        for service_uuid in outstanding {
            if let Err(error) = self
                .context
                .driver
                .discover_characteristics(&self.id, &service_uuid)
                .await
            {
                self.fail_discovery(OperationError::DiscoveryFailed {
                    reason: error.to_string(),
                });
                return;
            }
        }
        self.complete_discovery_if_ready();
    }

    fn on_characteristics_discovered(
        &mut self,
        service_uuid: &str,
        characteristics: Vec<DriverCharacteristic>,
    ) {
        let Some(pass) = self.queue.discovery_mut() else {
            debug!(service_uuid, "characteristics reported without a discovery in flight");
            return;
        };
        if !pass.on_characteristics(service_uuid, characteristics) {
            debug!(service_uuid, "ignoring characteristics for unexpected service");
            return;
        }
        trace!(service_uuid, remaining = pass.outstanding(), "service enumerated");
        self.complete_discovery_if_ready();
    }

    fn complete_discovery_if_ready(&mut self) {
        if !self
            .queue
            .discovery_mut()
            .is_some_and(|pass| pass.is_complete())
        {
            return;
        }
        let Some(pass) = self.queue.take_discovery() else {
            return;
        };
        if self.state != ConnectionState::DiscoveringServices {
            debug!(state = %self.state, "discovery finished on a closing link");
            pass.fail(OperationError::Cancelled);
            return;
        }
        let services: Arc<[ServiceInfo]> = pass.complete().into();
        info!(services = services.len(), "service discovery complete");
        self.services = Some(services);
        self.transition(ConnectionState::Ready);
    }

    fn fail_discovery(&mut self, error: OperationError) {
        let Some(pass) = self.queue.take_discovery() else {
            return;
        };
        warn!(%error, "service discovery did not complete");
        pass.fail(error);
        if self.state == ConnectionState::DiscoveringServices {
            self.transition(ConnectionState::Connected);
        }
    }

    async fn set_notify(&self, request: &GattRequest, enable: bool) -> Result<(), OperationError> {
        let (target, characteristic) = self.resolve(request)?;
        self.context
            .driver
            .set_characteristic_notification(&target, enable)
            .await
            .map_err(|error| OperationError::SetNotifyFailed {
                reason: error.to_string(),
            })?;

        let payload = cccd_payload(&characteristic, enable);
        match self
            .context
            .driver
            .write_descriptor(&target, CCCD_UUID, &payload)
            .await
        {
            Ok(()) => {}
            Err(DriverError::DescriptorNotFound { .. }) => {
                debug!(?target, "characteristic has no configuration descriptor");
            }
            Err(error) => {
                warn!(?error, ?target, "failed to write configuration descriptor");
            }
        }
        debug!(?target, enable, "notification state changed");
        Ok(())
    }

    /// Resolves a request against the last completed discovery.
    fn resolve(
        &self,
        request: &GattRequest,
    ) -> Result<(GattTarget, CharacteristicInfo), OperationError> {
        let service = self
            .services
            .as_deref()
            .and_then(|services| find_service(services, &request.service_uuid))
            .ok_or_else(|| OperationError::ServiceNotFound {
                service_uuid: request.service_uuid.clone(),
            })?;
        let characteristic = service
            .characteristic(&request.characteristic_uuid)
            .ok_or_else(|| OperationError::CharacteristicNotFound {
                service_uuid: request.service_uuid.clone(),
                characteristic_uuid: request.characteristic_uuid.clone(),
            })?;
        let target = GattTarget::new(self.id.clone(), service.uuid(), characteristic.uuid());
        Ok((target, characteristic.clone()))
    }

    fn transition(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, "connection state changed");
        self.state = state;
        self.publish();
        self.context.emitter.connection_state(&self.id, state);
    }

    /// Runs teardown once: cancels work, frees driver handles, emits `disconnected`.
    async fn terminate(&mut self, state: ConnectionState) {
        if self.state.is_terminal() {
            return;
        }
        self.state = state;
        self.publish();
        self.context.arena.remove(&self.id, self.serial);

        let cancelled = self.queue.cancel_all();
        if cancelled > 0 {
            debug!(cancelled, "cancelled pending operations");
        }
        self.context.driver.release(&self.id).await;
        self.context
            .emitter
            .connection_state(&self.id, ConnectionState::Disconnected);
    }

    fn publish(&self) {
        self.publisher.send_replace(ConnectionSnapshot {
            state: self.state,
            services: self.services.clone(),
        });
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Builds the event for a value no pending read claimed.
pub(crate) fn notification(target: GattTarget, value: Vec<u8>) -> BleEvent {
    BleEvent::Notification {
        device_id: target.peripheral().clone(),
        service_uuid: target.service_uuid().to_string(),
        char_uuid: target.characteristic_uuid().to_string(),
        data: value,
    }
}

/// Prefers acknowledged writes whenever the characteristic allows them.
pub(crate) fn write_mode_for(characteristic: &CharacteristicInfo) -> WriteMode {
    if !characteristic.supports(Capability::Write)
        && characteristic.supports(Capability::WriteWithoutResponse)
    {
        WriteMode::WithoutResponse
    } else {
        WriteMode::WithResponse
    }
}

pub(crate) fn cccd_payload(characteristic: &CharacteristicInfo, enable: bool) -> [u8; 2] {
    if !enable {
        CCCD_DISABLE
    } else if characteristic.supports(Capability::Notify) {
        CCCD_ENABLE_NOTIFICATION
    } else if characteristic.supports(Capability::Indicate) {
        CCCD_ENABLE_INDICATION
    } else {
        CCCD_ENABLE_NOTIFICATION
    }
}
