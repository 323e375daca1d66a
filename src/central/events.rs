use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use crate::hw::{ConnectionState, PeripheralId, RadioState};

/// Stream handed to the single event subscriber.
pub type EventStream = UnboundedReceiverStream<BleEvent>;

/// One entry of a `scanResult` snapshot.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ScannedDevice {
    pub id: PeripheralId,
    pub name: String,
    pub rssi: i16,
}

/// Events published to the subscriber.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BleEvent {
    /// Full list of peripherals seen in the current scan session.
    ScanResult { devices: Vec<ScannedDevice> },
    ScanError { code: i32, message: String },
    ConnectionState {
        device_id: PeripheralId,
        state: ConnectionState,
    },
    /// A characteristic value that no pending read claimed.
    Notification {
        device_id: PeripheralId,
        service_uuid: String,
        char_uuid: String,
        data: Vec<u8>,
    },
    BluetoothState { state: RadioState },
}

/// Single-subscriber event fan-out.
///
/// Subscribing again replaces the previous subscriber, whose stream then ends.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventEmitter {
    subscriber: Arc<Mutex<Option<mpsc::UnboundedSender<BleEvent>>>>,
}

impl EventEmitter {
    pub(crate) fn subscribe(&self) -> EventStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.lock() = Some(sender);
        UnboundedReceiverStream::new(receiver)
    }

    pub(crate) fn unsubscribe(&self) {
        self.lock().take();
    }

    pub(crate) fn emit(&self, event: BleEvent) {
        let mut subscriber = self.lock();
        let Some(sender) = subscriber.as_ref() else {
            trace!(?event, "dropping event without subscriber");
            return;
        };
        if sender.send(event).is_err() {
            trace!("event subscriber went away");
            subscriber.take();
        }
    }

    pub(crate) fn connection_state(&self, device_id: &PeripheralId, state: ConnectionState) {
        self.emit(BleEvent::ConnectionState {
            device_id: device_id.clone(),
            state,
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<BleEvent>>> {
        self.subscriber
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
