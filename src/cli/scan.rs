use std::io;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, instrument};

use crate::central::Central;
use crate::cli::OutputFormat;
use crate::cli::command::ScanArgs;
use crate::hw::{DiscoveredPeripheral, PeripheralId};
use crate::terminal::TerminalClient;

use super::ui::{Painter, ScanView};

#[derive(Debug, Serialize)]
struct ScanReport {
    devices: Vec<ScanEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanEntry {
    id: PeripheralId,
    name: String,
    rssi: i16,
    last_seen_unix: i64,
}

impl From<&DiscoveredPeripheral> for ScanEntry {
    fn from(device: &DiscoveredPeripheral) -> Self {
        Self {
            id: device.id().clone(),
            name: device.display_name().to_string(),
            rssi: device.last_rssi(),
            last_seen_unix: device.last_seen_at().unix_timestamp(),
        }
    }
}

/// Executes the `scan` command.
#[instrument(skip(central, out, terminal_client), level = "info", fields(timeout = ?args.timeout))]
pub(crate) async fn run<W>(
    central: &Central,
    args: &ScanArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    central
        .start_scan(args.name_filter.as_deref(), args.timeout)
        .await?;
    tokio::time::sleep(args.timeout).await;
    central.stop_scan().await?;

    let devices = central.discovered_devices();
    info!(found = devices.len(), "scan finished");

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", ScanView::new(&devices, &painter))?;
        }
        OutputFormat::Json => {
            let report = ScanReport {
                devices: devices.iter().map(ScanEntry::from).collect(),
            };
            serde_json::to_writer_pretty(&mut *out, &report)?;
            writeln!(out)?;
        }
    }

    Ok(())
}
