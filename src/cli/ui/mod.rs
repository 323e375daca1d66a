mod gatt_view;
mod inspect_view;
mod painter;
mod scan_view;
mod table;

pub(crate) use self::gatt_view::{
    ListenNotificationView, ListenReadyView, ListenStopReason, ListenSummaryView, ReadValueView,
    WriteReceiptView,
};
pub(crate) use self::inspect_view::InspectView;
pub(crate) use self::painter::Painter;
pub(crate) use self::scan_view::ScanView;
