mod app;
mod central;
mod cli;
mod error;
mod hw;
mod telemetry;
mod terminal;
mod utils;

pub use app::{
    fake_driver, real_driver, run, run_with_clients, run_with_clients_and_log_level,
    run_with_log_level,
};
pub use central::{BleEvent, Central, CentralConfig, EventStream, ScannedDevice};
pub use cli::{
    Args, CharacteristicArgs, Command, DeviceArgs, FakeArgs, ListenArgs, LogLevel, OutputFormat,
    ScanArgs, WriteArgs,
};
pub use error::{
    CentralError, ConnectError, DisconnectError, DriverError, FixtureError, OperationError,
    ScanError,
};
pub use hw::{
    Advertisement, BleDriver, BtleplugDriver, Capability, CharacteristicInfo, ConnectionState,
    DiscoveredPeripheral, DriverCharacteristic, DriverEvent, DriverEventSink, DriverEvents,
    DriverService, FAKE_NOTIFY_CHARACTERISTIC_UUID, FAKE_SERVICE_UUID,
    FAKE_WRITE_CHARACTERISTIC_UUID, FakeCall, FakeDriver, FakeDriverConfig, FakeWriteBehaviour,
    GATT_SUCCESS, GattTarget, HexPayload, NotificationPayloads, PeripheralId, RadioPreconditions,
    RadioState, ScanFixture, ServiceInfo, WriteMode, WriteSubmission, default_services,
};
pub use terminal::TerminalClient;
