use std::fmt::{self, Display, Formatter};

use crate::hw::DiscoveredPeripheral;
use crate::utils::format_rssi;

use super::painter::Painter;
use super::table::Table;

/// Renders the peripherals collected by one scan.
pub(crate) struct ScanView<'a> {
    devices: &'a [DiscoveredPeripheral],
    painter: &'a Painter,
}

impl<'a> ScanView<'a> {
    pub(crate) fn new(devices: &'a [DiscoveredPeripheral], painter: &'a Painter) -> Self {
        Self { devices, painter }
    }
}

impl Display for ScanView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.devices.is_empty() {
            return write!(f, "{}", self.painter.warning("No peripherals found."));
        }

        let rows = self
            .devices
            .iter()
            .map(|device| {
                vec![
                    self.painter.value(device.id().as_str()),
                    device.display_name().to_string(),
                    self.painter
                        .rssi(device.last_rssi(), &format_rssi(device.last_rssi())),
                ]
            })
            .collect();
        write!(
            f,
            "{}\n{}",
            self.painter
                .heading(format!("Found {} peripheral(s):", self.devices.len())),
            Table::grid(["id", "name", "rssi"], rows)
        )
    }
}
