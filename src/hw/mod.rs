mod btleplug_backend;
mod driver;
mod fake_backend;
mod hardware;
mod model;

pub use self::btleplug_backend::BtleplugDriver;
pub(crate) use self::driver::{
    CCCD_DISABLE, CCCD_ENABLE_INDICATION, CCCD_ENABLE_NOTIFICATION, CCCD_UUID,
};
pub use self::driver::{
    Advertisement, BleDriver, DriverCharacteristic, DriverEvent, DriverEventSink, DriverEvents,
    DriverService, GATT_SUCCESS, GattTarget, RadioPreconditions, WriteMode, WriteSubmission,
};
pub use self::fake_backend::{
    FAKE_NOTIFY_CHARACTERISTIC_UUID, FAKE_SERVICE_UUID, FAKE_WRITE_CHARACTERISTIC_UUID, FakeCall,
    FakeDriver, FakeDriverConfig, FakeWriteBehaviour, HexPayload, NotificationPayloads, ScanFixture,
    default_services,
};
pub(crate) use self::hardware::{DriverBackend, driver_from_backend};
pub(crate) use self::model::{UNKNOWN_DEVICE_NAME, canonical_uuid, find_service, uuid_matches};
pub use self::model::{
    Capability, CharacteristicInfo, ConnectionState, DiscoveredPeripheral, PeripheralId,
    RadioState, ServiceInfo,
};
