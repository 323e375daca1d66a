use derive_more::From;
use thiserror::Error;

use crate::hw::PeripheralId;

/// Errors raised by a BLE driver primitive.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("peripheral `{peripheral}` is not known to the driver")]
    UnknownPeripheral { peripheral: PeripheralId },
    #[error("attribute `{uuid}` was not found on peripheral `{peripheral}`")]
    UnknownAttribute {
        peripheral: PeripheralId,
        uuid: String,
    },
    #[error("descriptor `{uuid}` was not found")]
    DescriptorNotFound { uuid: String },
    #[error("the driver rejected the request: {reason}")]
    Rejected { reason: String },
    #[error("the driver event stream has already been taken")]
    EventsAlreadyTaken,
}

/// Errors returned when starting or stopping a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("the Bluetooth radio is unavailable or powered off")]
    RadioUnavailable,
    #[error("required Bluetooth permissions have not been granted")]
    PermissionDenied,
    #[error("location services must be enabled for Bluetooth scanning on this platform")]
    LocationServiceDisabled,
    #[error("the driver failed to change scan state")]
    Driver(#[source] DriverError),
}

/// Errors returned by `connect`.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("device `{peripheral}` was not found")]
    DeviceNotFound { peripheral: PeripheralId },
    #[error("failed to connect to `{peripheral}`")]
    ConnectionFailed {
        peripheral: PeripheralId,
        #[source]
        source: DriverError,
    },
}

/// Errors returned by `disconnect`.
#[derive(Debug, Error)]
pub enum DisconnectError {
    #[error("the driver failed to disconnect `{peripheral}`")]
    Driver {
        peripheral: PeripheralId,
        #[source]
        source: DriverError,
    },
}

/// Errors resolving a queued GATT operation.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum OperationError {
    #[error("device `{peripheral}` is not connected")]
    NotConnected { peripheral: PeripheralId },
    #[error("service `{service_uuid}` was not found")]
    ServiceNotFound { service_uuid: String },
    #[error("characteristic `{characteristic_uuid}` was not found in service `{service_uuid}`")]
    CharacteristicNotFound {
        service_uuid: String,
        characteristic_uuid: String,
    },
    #[error("service discovery failed: {reason}")]
    DiscoveryFailed { reason: String },
    #[error("service discovery timed out")]
    DiscoveryTimeout,
    #[error("characteristic write failed with status {status}")]
    WriteFailed { status: i32 },
    #[error("characteristic read failed: {reason}")]
    ReadFailed { reason: String },
    #[error("failed to change notification state: {reason}")]
    SetNotifyFailed { reason: String },
    #[error("the operation was cancelled because the connection closed")]
    Cancelled,
}

/// Errors returned when parsing fake driver fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake discovery fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain three pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain empty mandatory fields")]
    EmptyRecordField,
    #[error("failed to parse RSSI value")]
    InvalidRssi(#[from] std::num::ParseIntError),
    #[error("invalid hex payload")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("missing fake scan fixture while fake mode is enabled")]
    MissingFakeScanFixture,
    #[error("device `{peripheral}` was not seen before the scan timed out")]
    DeviceNotDiscovered { peripheral: PeripheralId },
    #[error("device `{peripheral}` disconnected before it became usable")]
    DeviceDisconnected { peripheral: PeripheralId },
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Top-level error wrapping every command-surface error type.
#[derive(Debug, Error, From)]
pub enum CentralError {
    #[error(transparent)]
    #[from(ScanError, Box<ScanError>)]
    Scan(Box<ScanError>),
    #[error(transparent)]
    #[from(ConnectError, Box<ConnectError>)]
    Connect(Box<ConnectError>),
    #[error(transparent)]
    #[from(DisconnectError, Box<DisconnectError>)]
    Disconnect(Box<DisconnectError>),
    #[error(transparent)]
    #[from(OperationError, Box<OperationError>)]
    Operation(Box<OperationError>),
    #[error(transparent)]
    #[from(DriverError, Box<DriverError>)]
    Driver(Box<DriverError>),
}
