use std::io;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, instrument};

use crate::central::Central;
use crate::cli::OutputFormat;
use crate::cli::command::{CharacteristicArgs, WriteArgs};
use crate::hw::{CharacteristicInfo, PeripheralId};
use crate::terminal::TerminalClient;

use super::session::DeviceSession;
use super::ui::{Painter, ReadValueView, WriteReceiptView};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadReport<'a> {
    device: &'a PeripheralId,
    service_uuid: &'a str,
    char_uuid: &'a str,
    value: String,
    length: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteReport<'a> {
    device: &'a PeripheralId,
    service_uuid: &'a str,
    char_uuid: &'a str,
    written: usize,
}

/// Executes the `read` command.
#[instrument(
    skip(central, out, terminal_client),
    level = "info",
    fields(
        device = %args.device.device,
        service = %args.service,
        characteristic = %args.characteristic
    )
)]
pub(crate) async fn read<W>(
    central: Central,
    args: &CharacteristicArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let session = DeviceSession::open(central, &args.device).await?;
    let outcome = read_value(&session, args).await;
    session.close().await?;
    let (characteristic, value) = outcome?;
    info!(len = value.len(), "read characteristic");

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", ReadValueView::new(&characteristic, &value, &painter))?;
        }
        OutputFormat::Json => {
            let report = ReadReport {
                device: &args.device.device,
                service_uuid: characteristic.service_uuid(),
                char_uuid: characteristic.uuid(),
                value: hex::encode(&value),
                length: value.len(),
            };
            serde_json::to_writer_pretty(&mut *out, &report)?;
            writeln!(out)?;
        }
    }

    Ok(())
}

/// Executes the `write` command.
#[instrument(
    skip(central, out, terminal_client),
    level = "info",
    fields(
        device = %args.target.device.device,
        service = %args.target.service,
        characteristic = %args.target.characteristic
    )
)]
pub(crate) async fn write<W>(
    central: Central,
    args: &WriteArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let session = DeviceSession::open(central, &args.target.device).await?;
    let outcome = write_value(&session, &args.target, args.payload.as_bytes()).await;
    session.close().await?;
    let characteristic = outcome?;
    let payload = args.payload.as_bytes();

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(
                out,
                "{}",
                WriteReceiptView::new(&characteristic, payload, &painter)
            )?;
        }
        OutputFormat::Json => {
            let report = WriteReport {
                device: &args.target.device.device,
                service_uuid: characteristic.service_uuid(),
                char_uuid: characteristic.uuid(),
                written: payload.len(),
            };
            serde_json::to_writer_pretty(&mut *out, &report)?;
            writeln!(out)?;
        }
    }

    Ok(())
}

async fn read_value(
    session: &DeviceSession,
    args: &CharacteristicArgs,
) -> Result<(CharacteristicInfo, Vec<u8>)> {
    let characteristic = session.characteristic(&args.service, &args.characteristic)?;
    let value = session
        .central()
        .read(session.device(), &args.service, &args.characteristic)
        .await?;
    Ok((characteristic, value))
}

async fn write_value(
    session: &DeviceSession,
    args: &CharacteristicArgs,
    payload: &[u8],
) -> Result<CharacteristicInfo> {
    let characteristic = session.characteristic(&args.service, &args.characteristic)?;
    session
        .central()
        .write(session.device(), &args.service, &args.characteristic, payload)
        .await?;
    Ok(characteristic)
}
