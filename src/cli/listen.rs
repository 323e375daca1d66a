use std::io;

use anyhow::Result;
use serde::Serialize;
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument};

use crate::central::{BleEvent, Central};
use crate::cli::OutputFormat;
use crate::cli::command::ListenArgs;
use crate::hw::{CharacteristicInfo, uuid_matches};
use crate::terminal::TerminalClient;

use super::session::DeviceSession;
use super::ui::{
    ListenNotificationView, ListenReadyView, ListenStopReason, ListenSummaryView, Painter,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationRecord {
    index: usize,
    value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListenSummaryRecord {
    received: usize,
    stop_reason: ListenStopReason,
}

/// Executes the `listen` command.
#[instrument(
    skip(central, out, terminal_client),
    level = "info",
    fields(device = %args.target.device.device, max_notifications = ?args.max_notifications)
)]
pub(crate) async fn run<W>(
    central: Central,
    args: &ListenArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let target = &args.target;
    let mut session = DeviceSession::open(central, &target.device).await?;

    let characteristic = match enable_notifications(&session, args).await {
        Ok(characteristic) => characteristic,
        Err(error) => {
            session.close().await?;
            return Err(error);
        }
    };

    if output_format == OutputFormat::Pretty {
        writeln!(
            out,
            "{}",
            ListenReadyView::new(session.device(), &characteristic, &painter)
        )?;
    }

    let mut renderer = NotificationRenderer {
        out: &mut *out,
        painter: &painter,
        output_format,
    };
    let outcome = stream_notifications(
        &mut session,
        &characteristic,
        args.max_notifications,
        &mut renderer,
    )
    .await;

    let disconnected = matches!(outcome, Ok((_, ListenStopReason::Disconnected)));
    if !disconnected
        && let Err(error) = session
            .central()
            .set_notify(session.device(), &target.service, &target.characteristic, false)
            .await
    {
        debug!(?error, "failed to disable notifications cleanly");
    }
    session.close().await?;

    let (received, stop_reason) = outcome?;
    info!(received, %stop_reason, "listen finished");
    match output_format {
        OutputFormat::Pretty => {
            writeln!(out)?;
            writeln!(
                out,
                "{}",
                ListenSummaryView::new(received, stop_reason, &painter)
            )?;
        }
        OutputFormat::Json => {
            serde_json::to_writer(
                &mut *out,
                &ListenSummaryRecord {
                    received,
                    stop_reason,
                },
            )?;
            writeln!(out)?;
        }
    }

    Ok(())
}

struct NotificationRenderer<'a, W> {
    out: &'a mut W,
    painter: &'a Painter,
    output_format: OutputFormat,
}

impl<W: io::Write> NotificationRenderer<'_, W> {
    fn render(&mut self, index: usize, payload: &[u8]) -> Result<()> {
        match self.output_format {
            OutputFormat::Pretty => {
                writeln!(
                    self.out,
                    "{}",
                    ListenNotificationView::new(index, payload, self.painter)
                )?;
            }
            OutputFormat::Json => {
                serde_json::to_writer(
                    &mut *self.out,
                    &NotificationRecord {
                        index,
                        value: hex::encode(payload),
                    },
                )?;
                writeln!(self.out)?;
            }
        }
        Ok(())
    }
}

async fn enable_notifications(
    session: &DeviceSession,
    args: &ListenArgs,
) -> Result<CharacteristicInfo> {
    let target = &args.target;
    let characteristic = session.characteristic(&target.service, &target.characteristic)?;
    session
        .central()
        .set_notify(session.device(), &target.service, &target.characteristic, true)
        .await?;
    Ok(characteristic)
}

/// Prints notifications for `characteristic` until the limit, Ctrl+C, or a disconnect.
async fn stream_notifications<W: io::Write>(
    session: &mut DeviceSession,
    characteristic: &CharacteristicInfo,
    max_notifications: Option<usize>,
    renderer: &mut NotificationRenderer<'_, W>,
) -> Result<(usize, ListenStopReason)> {
    let mut received = 0;
    if max_notifications == Some(0) {
        return Ok((received, ListenStopReason::ReachedLimit));
    }

    let device = session.device().clone();
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        let event = tokio::select! {
            _ = &mut interrupted => return Ok((received, ListenStopReason::Interrupted)),
            event = session.events().next() => event,
        };
        match event {
            Some(BleEvent::Notification {
                device_id,
                service_uuid,
                char_uuid,
                data,
            }) if device_id == device
                && uuid_matches(&service_uuid, characteristic.service_uuid())
                && uuid_matches(&char_uuid, characteristic.uuid()) =>
            {
                received += 1;
                renderer.render(received, &data)?;
                if max_notifications.is_some_and(|limit| received >= limit) {
                    return Ok((received, ListenStopReason::ReachedLimit));
                }
            }
            Some(BleEvent::ConnectionState { device_id, state })
                if device_id == device && state.is_terminal() =>
            {
                return Ok((received, ListenStopReason::Disconnected));
            }
            Some(_) => {}
            None => return Ok((received, ListenStopReason::Disconnected)),
        }
    }
}
