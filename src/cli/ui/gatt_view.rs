use std::fmt::{self, Display, Formatter};

use crate::hw::{CharacteristicInfo, PeripheralId};
use crate::utils::{format_capabilities, format_hex};

use super::painter::Painter;
use super::table::Table;

/// Renders the value returned by a characteristic read.
pub(crate) struct ReadValueView<'a> {
    characteristic: &'a CharacteristicInfo,
    value: &'a [u8],
    painter: &'a Painter,
}

impl<'a> ReadValueView<'a> {
    pub(crate) fn new(
        characteristic: &'a CharacteristicInfo,
        value: &'a [u8],
        painter: &'a Painter,
    ) -> Self {
        Self {
            characteristic,
            value,
            painter,
        }
    }
}

impl Display for ReadValueView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::key_value(
            self.painter,
            vec![
                ("service", self.characteristic.service_uuid().to_string()),
                ("characteristic", self.characteristic.uuid().to_string()),
                ("length", self.value.len().to_string()),
                ("value", self.painter.value(format_hex(self.value))),
            ],
        );
        write!(f, "{}\n{table}", self.painter.heading("Read:"))
    }
}

/// Renders the outcome of a characteristic write.
pub(crate) struct WriteReceiptView<'a> {
    characteristic: &'a CharacteristicInfo,
    payload: &'a [u8],
    painter: &'a Painter,
}

impl<'a> WriteReceiptView<'a> {
    pub(crate) fn new(
        characteristic: &'a CharacteristicInfo,
        payload: &'a [u8],
        painter: &'a Painter,
    ) -> Self {
        Self {
            characteristic,
            payload,
            painter,
        }
    }
}

impl Display for WriteReceiptView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.painter.success("Wrote"),
            self.painter.value(format!("{} byte(s)", self.payload.len())),
            self.painter.muted("to"),
            self.characteristic.uuid()
        )
    }
}

/// Renders the header printed before notifications stream in.
pub(crate) struct ListenReadyView<'a> {
    device: &'a PeripheralId,
    characteristic: &'a CharacteristicInfo,
    painter: &'a Painter,
}

impl<'a> ListenReadyView<'a> {
    pub(crate) fn new(
        device: &'a PeripheralId,
        characteristic: &'a CharacteristicInfo,
        painter: &'a Painter,
    ) -> Self {
        Self {
            device,
            characteristic,
            painter,
        }
    }
}

impl Display for ListenReadyView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::key_value(
            self.painter,
            vec![
                ("device", self.painter.value(self.device.as_str())),
                ("listening_on", self.painter.value(self.characteristic.uuid())),
                (
                    "capabilities",
                    format_capabilities(self.characteristic.capabilities()),
                ),
            ],
        );
        write!(f, "{}\n{table}", self.painter.heading("Listen session:"))
    }
}

/// Renders a single notification line.
pub(crate) struct ListenNotificationView<'a> {
    index: usize,
    payload: &'a [u8],
    painter: &'a Painter,
}

impl<'a> ListenNotificationView<'a> {
    pub(crate) fn new(index: usize, payload: &'a [u8], painter: &'a Painter) -> Self {
        Self {
            index,
            payload,
            painter,
        }
    }
}

impl Display for ListenNotificationView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.painter.muted(format!("[{:04}]", self.index)),
            self.painter.value(format_hex(self.payload))
        )
    }
}

/// Why a listen session ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq, strum_macros::Display, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum ListenStopReason {
    #[strum(to_string = "reached notification limit")]
    ReachedLimit,
    #[strum(to_string = "interrupted")]
    Interrupted,
    #[strum(to_string = "peripheral disconnected")]
    Disconnected,
}

/// Renders the listen session summary.
pub(crate) struct ListenSummaryView<'a> {
    received: usize,
    stop_reason: ListenStopReason,
    painter: &'a Painter,
}

impl<'a> ListenSummaryView<'a> {
    pub(crate) fn new(
        received: usize,
        stop_reason: ListenStopReason,
        painter: &'a Painter,
    ) -> Self {
        Self {
            received,
            stop_reason,
            painter,
        }
    }
}

impl Display for ListenSummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let stop_reason = match self.stop_reason {
            ListenStopReason::ReachedLimit => self.painter.success(self.stop_reason.to_string()),
            ListenStopReason::Interrupted | ListenStopReason::Disconnected => {
                self.painter.warning(self.stop_reason.to_string())
            }
        };
        write!(
            f,
            "{} {} {}",
            self.painter.heading("Stopped:"),
            stop_reason,
            self.painter
                .value(format!("- received {} notification(s)", self.received))
        )
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::hw::Capability;

    fn notify_characteristic() -> CharacteristicInfo {
        CharacteristicInfo::new("ffe1", "ffe0", vec![Capability::Notify, Capability::Read])
    }

    #[test]
    fn read_view_shows_value_as_hex() {
        let painter = Painter::new(false);
        let characteristic = notify_characteristic();
        let view = ReadValueView::new(&characteristic, &[0xde, 0xad, 0xbe, 0xef], &painter);

        assert_snapshot!(view.to_string(), @"
        Read:
        ╭────────────────┬──────────────────────────────────────╮
        │ field          │ value                                │
        ├────────────────┼──────────────────────────────────────┤
        │ service        │ 0000ffe0-0000-1000-8000-00805f9b34fb │
        │ characteristic │ 0000ffe1-0000-1000-8000-00805f9b34fb │
        │ length         │ 4                                    │
        │ value          │ DE AD BE EF                          │
        ╰────────────────┴──────────────────────────────────────╯
        ");
    }

    #[test]
    fn listen_ready_view_lists_capabilities() {
        let painter = Painter::new(false);
        let device = PeripheralId::from("AA:BB");
        let characteristic = notify_characteristic();

        assert_snapshot!(ListenReadyView::new(&device, &characteristic, &painter).to_string(), @"
        Listen session:
        ╭──────────────┬──────────────────────────────────────╮
        │ field        │ value                                │
        ├──────────────┼──────────────────────────────────────┤
        │ device       │ AA:BB                                │
        │ listening_on │ 0000ffe1-0000-1000-8000-00805f9b34fb │
        │ capabilities │ read,notify                          │
        ╰──────────────┴──────────────────────────────────────╯
        ");
    }

    #[test]
    fn notification_line_is_indexed_hex() {
        let painter = Painter::new(false);
        assert_snapshot!(
            ListenNotificationView::new(7, &[0x05, 0x00, 0xa1], &painter).to_string(),
            @"[0007] 05 00 A1"
        );
    }

    #[rstest]
    #[case(
        ListenStopReason::ReachedLimit,
        "Stopped: reached notification limit - received 2 notification(s)"
    )]
    #[case(
        ListenStopReason::Disconnected,
        "Stopped: peripheral disconnected - received 2 notification(s)"
    )]
    fn summary_names_stop_reason(#[case] reason: ListenStopReason, #[case] expected: &str) {
        let painter = Painter::new(false);
        assert_eq!(expected, ListenSummaryView::new(2, reason, &painter).to_string());
    }

    #[test]
    fn write_receipt_counts_bytes() {
        let painter = Painter::new(false);
        let characteristic = CharacteristicInfo::new("ffe2", "ffe0", vec![Capability::Write]);
        assert_snapshot!(
            WriteReceiptView::new(&characteristic, &[0, 1, 2, 255], &painter).to_string(),
            @"Wrote 4 byte(s) to 0000ffe2-0000-1000-8000-00805f9b34fb"
        );
    }
}
