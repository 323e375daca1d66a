use std::fmt::{self, Display, Formatter};

use strum::IntoEnumIterator;

use crate::hw::{Capability, PeripheralId, ServiceInfo};

use super::painter::Painter;
use super::table::Table;

const CAPABILITY_MARK: &str = "✓";

/// Renders the GATT table of a connected peripheral.
pub(crate) struct InspectView<'a> {
    device: &'a PeripheralId,
    services: &'a [ServiceInfo],
    painter: &'a Painter,
}

impl<'a> InspectView<'a> {
    pub(crate) fn new(
        device: &'a PeripheralId,
        services: &'a [ServiceInfo],
        painter: &'a Painter,
    ) -> Self {
        Self {
            device,
            services,
            painter,
        }
    }

    fn characteristic_rows(&self, service: &ServiceInfo) -> Vec<Vec<String>> {
        service
            .characteristics()
            .iter()
            .map(|characteristic| {
                let mut row = vec![self.painter.value(characteristic.uuid())];
                row.extend(Capability::iter().map(|capability| {
                    if characteristic.supports(capability) {
                        self.painter.success(CAPABILITY_MARK)
                    } else {
                        String::new()
                    }
                }));
                row
            })
            .collect()
    }
}

impl Display for InspectView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let characteristic_count: usize = self
            .services
            .iter()
            .map(|service| service.characteristics().len())
            .sum();
        let summary = Table::key_value(
            self.painter,
            vec![
                ("device", self.painter.value(self.device.as_str())),
                ("services", self.services.len().to_string()),
                ("characteristics", characteristic_count.to_string()),
            ],
        );
        write!(f, "{}\n{summary}", self.painter.heading("Connected device:"))?;

        let headers: Vec<String> = std::iter::once("characteristic".to_string())
            .chain(Capability::iter().map(|capability| capability.to_string()))
            .collect();
        for service in self.services {
            let kind = if service.is_primary() {
                "primary"
            } else {
                "secondary"
            };
            write!(
                f,
                "\n\n{} {}",
                self.painter.heading(format!("Service {}", service.uuid())),
                self.painter.muted(format!("({kind})"))
            )?;
            let table = Table::grid(headers.clone(), self.characteristic_rows(service));
            if table.is_empty() {
                write!(f, "\n{}", self.painter.muted("no characteristics"))?;
            } else {
                write!(f, "\n{table}")?;
            }
        }
        Ok(())
    }
}
