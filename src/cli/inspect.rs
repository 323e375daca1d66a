use std::io;

use anyhow::Result;
use serde::Serialize;
use tracing::instrument;

use crate::central::Central;
use crate::cli::OutputFormat;
use crate::cli::command::DeviceArgs;
use crate::hw::{PeripheralId, ServiceInfo};
use crate::terminal::TerminalClient;

use super::session::DeviceSession;
use super::ui::{InspectView, Painter};

#[derive(Debug, Serialize)]
struct InspectReport<'a> {
    device: &'a PeripheralId,
    services: &'a [ServiceInfo],
}

/// Executes the `inspect` command.
#[instrument(
    skip(central, out, terminal_client),
    level = "info",
    fields(device = %args.device, ?output_format)
)]
pub(crate) async fn run<W>(
    central: Central,
    args: &DeviceArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let session = DeviceSession::open(central, args).await?;
    let device = session.device().clone();
    let services = session.services().to_vec();
    session.close().await?;

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", InspectView::new(&device, &services, &painter))?;
        }
        OutputFormat::Json => {
            let report = InspectReport {
                device: &device,
                services: &services,
            };
            serde_json::to_writer_pretty(&mut *out, &report)?;
            writeln!(out)?;
        }
    }

    Ok(())
}
