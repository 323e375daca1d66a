use std::collections::VecDeque;
use std::mem;

use strum_macros::Display;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::trace;

use crate::error::OperationError;
use crate::hw::{
    CharacteristicInfo, DriverCharacteristic, DriverService, GattTarget, ServiceInfo,
    canonical_uuid, uuid_matches,
};

/// One-shot completion for a queued operation.
pub(crate) type Responder<T> = oneshot::Sender<Result<T, OperationError>>;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display)]
pub(crate) enum OperationKind {
    #[strum(to_string = "discover")]
    Discover,
    #[strum(to_string = "read")]
    Read,
    #[strum(to_string = "write")]
    Write,
    #[strum(to_string = "set_notify")]
    SetNotify,
}

/// Identifies which driver callback may resolve an in-flight operation.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub(crate) struct CorrelationKey {
    target: GattTarget,
    kind: OperationKind,
}

impl CorrelationKey {
    pub(crate) fn for_target(target: &GattTarget, kind: OperationKind) -> Self {
        Self {
            target: target.clone(),
            kind,
        }
    }

    pub(crate) fn matches(&self, target: &GattTarget, kind: OperationKind) -> bool {
        self.kind == kind && self.target.same_characteristic(target)
    }
}

/// Caller-supplied characteristic address, resolved at dispatch time.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct GattRequest {
    pub(crate) service_uuid: String,
    pub(crate) characteristic_uuid: String,
}

impl GattRequest {
    pub(crate) fn new(service_uuid: &str, characteristic_uuid: &str) -> Self {
        Self {
            service_uuid: canonical_uuid(service_uuid),
            characteristic_uuid: canonical_uuid(characteristic_uuid),
        }
    }
}

/// A request waiting in a connection's queue.
#[derive(Debug)]
pub(crate) enum Operation {
    Discover {
        responders: Vec<Responder<Vec<ServiceInfo>>>,
    },
    Read {
        request: GattRequest,
        responder: Responder<Vec<u8>>,
    },
    Write {
        request: GattRequest,
        payload: Vec<u8>,
        responder: Responder<()>,
    },
    SetNotify {
        request: GattRequest,
        enable: bool,
        responder: Responder<()>,
    },
}

impl Operation {
    pub(crate) fn kind(&self) -> OperationKind {
        match self {
            Self::Discover { .. } => OperationKind::Discover,
            Self::Read { .. } => OperationKind::Read,
            Self::Write { .. } => OperationKind::Write,
            Self::SetNotify { .. } => OperationKind::SetNotify,
        }
    }

    pub(crate) fn fail(self, error: OperationError) {
        match self {
            Self::Discover { responders } => {
                for responder in responders {
                    let _ = responder.send(Err(error.clone()));
                }
            }
            Self::Read { responder, .. } => {
                let _ = responder.send(Err(error));
            }
            Self::Write { responder, .. } | Self::SetNotify { responder, .. } => {
                let _ = responder.send(Err(error));
            }
        }
    }
}

#[derive(Debug)]
struct PendingService {
    uuid: String,
    primary: bool,
    characteristics: Option<Vec<CharacteristicInfo>>,
}

/// Count-down latch over one service discovery pass.
#[derive(Debug)]
pub(crate) struct DiscoveryPass {
    responders: Vec<Responder<Vec<ServiceInfo>>>,
    deadline: Instant,
    services: Option<Vec<PendingService>>,
}

impl DiscoveryPass {
    pub(crate) fn new(responders: Vec<Responder<Vec<ServiceInfo>>>, deadline: Instant) -> Self {
        Self {
            responders,
            deadline,
            services: None,
        }
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.deadline
    }

    pub(crate) fn has_services(&self) -> bool {
        self.services.is_some()
    }

    /// Records the service list and returns services still needing enumeration.
    pub(crate) fn on_services(&mut self, services: Vec<DriverService>) -> Vec<String> {
        let pending: Vec<PendingService> = services
            .into_iter()
            .map(|service| {
                let uuid = canonical_uuid(&service.uuid);
                let characteristics = service
                    .characteristics
                    .map(|characteristics| to_characteristic_infos(&uuid, characteristics));
                PendingService {
                    uuid,
                    primary: service.primary,
                    characteristics,
                }
            })
            .collect();
        let outstanding = pending
            .iter()
            .filter(|service| service.characteristics.is_none())
            .map(|service| service.uuid.clone())
            .collect();
        self.services = Some(pending);
        outstanding
    }

    /// Fills one service's characteristics. Returns `false` for unknown or
    /// already-enumerated services.
    pub(crate) fn on_characteristics(
        &mut self,
        service_uuid: &str,
        characteristics: Vec<DriverCharacteristic>,
    ) -> bool {
        let Some(services) = self.services.as_mut() else {
            return false;
        };
        let Some(service) = services.iter_mut().find(|service| {
            service.characteristics.is_none() && uuid_matches(&service.uuid, service_uuid)
        }) else {
            return false;
        };
        service.characteristics = Some(to_characteristic_infos(&service.uuid, characteristics));
        true
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.services.as_ref().map_or(usize::MAX, |services| {
            services
                .iter()
                .filter(|service| service.characteristics.is_none())
                .count()
        })
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.outstanding() == 0
    }

    pub(crate) fn join(&mut self, responders: Vec<Responder<Vec<ServiceInfo>>>) {
        self.responders.extend(responders);
    }

    /// Resolves every waiter with the assembled services.
    ///
    /// Only valid once [`DiscoveryPass::is_complete`] holds.
    pub(crate) fn complete(self) -> Vec<ServiceInfo> {
        let services: Vec<ServiceInfo> = self
            .services
            .unwrap_or_default()
            .into_iter()
            .map(|service| {
                ServiceInfo::new(
                    &service.uuid,
                    service.primary,
                    service.characteristics.unwrap_or_default(),
                )
            })
            .collect();
        for responder in self.responders {
            let _ = responder.send(Ok(services.clone()));
        }
        services
    }

    pub(crate) fn fail(self, error: OperationError) {
        for responder in self.responders {
            let _ = responder.send(Err(error.clone()));
        }
    }
}

fn to_characteristic_infos(
    service_uuid: &str,
    characteristics: Vec<DriverCharacteristic>,
) -> Vec<CharacteristicInfo> {
    characteristics
        .into_iter()
        .map(|characteristic| {
            CharacteristicInfo::new(&characteristic.uuid, service_uuid, characteristic.capabilities)
        })
        .collect()
}

/// The single operation currently waiting on the driver.
#[derive(Debug)]
pub(crate) enum InFlight {
    Discover(DiscoveryPass),
    Read {
        key: CorrelationKey,
        responder: Responder<Vec<u8>>,
    },
    Write {
        key: CorrelationKey,
        responder: Responder<()>,
    },
}

/// FIFO of operations for one connection with at most one in flight.
#[derive(Debug, Default)]
pub(crate) struct OperationQueue {
    pending: VecDeque<Operation>,
    in_flight: Option<InFlight>,
}

impl OperationQueue {
    /// Enqueues an operation, collapsing discovery requests into an existing one.
    pub(crate) fn submit(&mut self, operation: Operation) {
        let operation = match operation {
            Operation::Discover { responders } => match self.join_discovery(responders) {
                Some(responders) => Operation::Discover { responders },
                None => return,
            },
            other => other,
        };
        trace!(kind = %operation.kind(), queued = self.pending.len(), "enqueued operation");
        self.pending.push_back(operation);
    }

    fn join_discovery(
        &mut self,
        responders: Vec<Responder<Vec<ServiceInfo>>>,
    ) -> Option<Vec<Responder<Vec<ServiceInfo>>>> {
        if let Some(InFlight::Discover(pass)) = self.in_flight.as_mut() {
            pass.join(responders);
            return None;
        }
        let queued = self.pending.iter_mut().find_map(|operation| match operation {
            Operation::Discover { responders } => Some(responders),
            _ => None,
        });
        match queued {
            Some(queued) => {
                queued.extend(responders);
                None
            }
            None => Some(responders),
        }
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Pops the next operation when nothing is in flight.
    pub(crate) fn next_ready(&mut self) -> Option<Operation> {
        if self.is_busy() {
            return None;
        }
        self.pending.pop_front()
    }

    pub(crate) fn begin(&mut self, in_flight: InFlight) {
        debug_assert!(self.in_flight.is_none());
        self.in_flight = Some(in_flight);
    }

    pub(crate) fn discovery_mut(&mut self) -> Option<&mut DiscoveryPass> {
        match self.in_flight.as_mut() {
            Some(InFlight::Discover(pass)) => Some(pass),
            _ => None,
        }
    }

    pub(crate) fn take_discovery(&mut self) -> Option<DiscoveryPass> {
        match self.in_flight.take() {
            Some(InFlight::Discover(pass)) => Some(pass),
            other => {
                self.in_flight = other;
                None
            }
        }
    }

    pub(crate) fn discovery_deadline(&self) -> Option<Instant> {
        match self.in_flight.as_ref() {
            Some(InFlight::Discover(pass)) => Some(pass.deadline()),
            _ => None,
        }
    }

    /// Claims the in-flight read for `target`, if it is the one waiting.
    pub(crate) fn take_read(&mut self, target: &GattTarget) -> Option<Responder<Vec<u8>>> {
        match self.in_flight.take() {
            Some(InFlight::Read { key, responder }) if key.matches(target, OperationKind::Read) => {
                Some(responder)
            }
            other => {
                self.in_flight = other;
                None
            }
        }
    }

    /// Claims the in-flight write for `target`, if it is the one waiting.
    pub(crate) fn take_write(&mut self, target: &GattTarget) -> Option<Responder<()>> {
        match self.in_flight.take() {
            Some(InFlight::Write { key, responder })
                if key.matches(target, OperationKind::Write) =>
            {
                Some(responder)
            }
            other => {
                self.in_flight = other;
                None
            }
        }
    }

    /// Fails every in-flight and queued operation.
    pub(crate) fn cancel_all(&mut self) -> usize {
        let mut cancelled = 0;
        if let Some(in_flight) = self.in_flight.take() {
            cancelled += 1;
            match in_flight {
                InFlight::Discover(pass) => pass.fail(OperationError::Cancelled),
                InFlight::Read { responder, .. } => {
                    let _ = responder.send(Err(OperationError::Cancelled));
                }
                InFlight::Write { responder, .. } => {
                    let _ = responder.send(Err(OperationError::Cancelled));
                }
            }
        }
        for operation in mem::take(&mut self.pending) {
            cancelled += 1;
            operation.fail(OperationError::Cancelled);
        }
        cancelled
    }
}
