use anyhow::Result;
use tokio::time::{Instant, sleep_until};
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument};

use crate::central::{BleEvent, Central, EventStream};
use crate::cli::command::DeviceArgs;
use crate::error::CliConfigError;
use crate::hw::{CharacteristicInfo, ConnectionState, PeripheralId, ServiceInfo};

/// A peripheral that has been found, connected, and enumerated.
pub(crate) struct DeviceSession {
    central: Central,
    device: PeripheralId,
    events: EventStream,
    services: Vec<ServiceInfo>,
}

impl DeviceSession {
    /// Scans until `args.device` shows up, then connects and discovers services.
    #[instrument(skip_all, level = "info", fields(device = %args.device))]
    pub(crate) async fn open(central: Central, args: &DeviceArgs) -> Result<Self> {
        let mut events = central.subscribe();
        wait_for_advertisement(&central, &mut events, args).await?;

        central.connect(&args.device).await?;
        wait_until_connected(&mut events, &args.device).await?;

        let services = match central.discover_services(&args.device).await {
            Ok(services) => services,
            Err(error) => {
                if let Err(error) = central.disconnect(&args.device).await {
                    debug!(?error, "failed to disconnect after discovery error");
                }
                return Err(error.into());
            }
        };
        info!(services = services.len(), "device ready");

        Ok(Self {
            central,
            device: args.device.clone(),
            events,
            services,
        })
    }

    pub(crate) fn central(&self) -> &Central {
        &self.central
    }

    pub(crate) fn device(&self) -> &PeripheralId {
        &self.device
    }

    pub(crate) fn services(&self) -> &[ServiceInfo] {
        &self.services
    }

    pub(crate) fn events(&mut self) -> &mut EventStream {
        &mut self.events
    }

    /// Resolves a characteristic against the discovered GATT table.
    pub(crate) fn characteristic(
        &self,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<CharacteristicInfo> {
        Ok(self
            .central
            .find_characteristic(&self.device, service_uuid, characteristic_uuid)?)
    }

    /// Disconnects and waits for the link to report closed.
    #[instrument(skip(self), level = "debug", fields(device = %self.device))]
    pub(crate) async fn close(mut self) -> Result<()> {
        self.central.disconnect(&self.device).await?;
        while self.central.connection_state(&self.device).is_some() {
            match self.events.next().await {
                Some(BleEvent::ConnectionState { device_id, state })
                    if device_id == self.device && state.is_terminal() =>
                {
                    break;
                }
                Some(_) => {}
                None => break,
            }
        }
        self.central.shutdown().await;
        Ok(())
    }
}

async fn wait_for_advertisement(
    central: &Central,
    events: &mut EventStream,
    args: &DeviceArgs,
) -> Result<()> {
    let deadline = Instant::now() + args.scan_timeout;
    central.start_scan(None, args.scan_timeout).await?;

    let found = loop {
        let event = tokio::select! {
            () = sleep_until(deadline) => break false,
            event = events.next() => event,
        };
        match event {
            Some(BleEvent::ScanResult { devices })
                if devices.iter().any(|device| device.id == args.device) =>
            {
                break true;
            }
            Some(_) => {}
            None => break false,
        }
    };

    central.stop_scan().await?;
    if !found {
        return Err(CliConfigError::DeviceNotDiscovered {
            peripheral: args.device.clone(),
        }
        .into());
    }
    Ok(())
}

async fn wait_until_connected(events: &mut EventStream, device: &PeripheralId) -> Result<()> {
    while let Some(event) = events.next().await {
        let BleEvent::ConnectionState { device_id, state } = event else {
            continue;
        };
        if &device_id != device {
            continue;
        }
        match state {
            ConnectionState::Connected => return Ok(()),
            state if state.is_terminal() => break,
            _ => {}
        }
    }
    Err(CliConfigError::DeviceDisconnected {
        peripheral: device.clone(),
    }
    .into())
}
