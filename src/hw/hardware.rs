use std::sync::Arc;

use tracing::info;

use super::btleplug_backend::BtleplugDriver;
use super::driver::BleDriver;
use super::fake_backend::{FakeDriver, FakeDriverConfig};
use crate::error::DriverError;

/// Runtime BLE driver selection.
#[derive(Debug)]
pub(crate) enum DriverBackend {
    Real,
    Fake(FakeDriverConfig),
}

/// Builds the driver for the selected backend.
pub(crate) async fn driver_from_backend(
    backend: DriverBackend,
) -> Result<Arc<dyn BleDriver>, DriverError> {
    let driver: Arc<dyn BleDriver> = match backend {
        DriverBackend::Real => Arc::new(BtleplugDriver::new().await?),
        DriverBackend::Fake(config) => {
            info!("using fake BLE driver");
            Arc::new(FakeDriver::new(config))
        }
    };

    Ok(driver)
}
