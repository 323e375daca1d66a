pub(crate) mod command;
pub(crate) mod gatt;
pub(crate) mod inspect;
pub(crate) mod listen;
pub(crate) mod scan;
mod session;
pub(crate) mod ui;

pub use self::command::{
    Args, CharacteristicArgs, Command, DeviceArgs, FakeArgs, ListenArgs, LogLevel, OutputFormat,
    ScanArgs, WriteArgs,
};
