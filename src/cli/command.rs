use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::error::{CliConfigError, FixtureError};
use crate::hw::{FakeDriverConfig, HexPayload, NotificationPayloads, PeripheralId, ScanFixture};

const DEFAULT_SCAN_TIMEOUT: &str = "10s";

/// Command-line options for the BLE central tool.
#[derive(Debug, Parser)]
#[command(
    name = "blecentral",
    about = "Scan, connect to, and exchange GATT data with BLE peripherals."
)]
pub struct Args {
    /// Overrides `RUST_LOG` for this run.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format. Defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    /// Uses the in-memory fake driver instead of a Bluetooth adapter.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake advertisements in the form `id|name|rssi;...` (`-` for no name).
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_scan: Option<ScanFixture>,
    /// Value returned by fake characteristic reads, as hexadecimal bytes.
    #[arg(long, global = true, requires = "fake")]
    fake_read: Option<HexPayload>,
    /// Comma-separated hexadecimal values pushed once notifications are enabled.
    #[arg(long, global = true, requires = "fake")]
    fake_notifications: Option<NotificationPayloads>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use blecentral::{Args, Command, ScanArgs};
    ///
    /// let args = Args::new(Command::Scan(ScanArgs::default()));
    /// let _ = args;
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            output: None,
            fake: false,
            fake_scan: None,
            fake_read: None,
            fake_notifications: None,
            command,
        }
    }

    /// Enables fake driver mode with pre-parsed fixtures.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            scan_fixture,
            read_value,
            notifications,
        } = fake;

        self.fake = true;
        self.fake_scan = Some(scan_fixture);
        self.fake_read = read_value;
        self.fake_notifications = notifications;
        self
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// Splits parsed arguments into the command and optional fake driver settings.
    ///
    /// # Errors
    ///
    /// Returns an error if fake mode is enabled without a scan fixture.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_scan,
            fake_read,
            fake_notifications,
            command,
            ..
        } = self;

        let fake_args = if fake {
            let Some(scan_fixture) = fake_scan else {
                return Err(CliConfigError::MissingFakeScanFixture.into());
            };
            Some(FakeArgs {
                scan_fixture,
                read_value: fake_read,
                notifications: fake_notifications,
            })
        } else {
            None
        };

        Ok((command, fake_args))
    }
}

/// Fake driver fixtures for programmatic runs.
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    scan_fixture: ScanFixture,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    read_value: Option<HexPayload>,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    notifications: Option<NotificationPayloads>,
}

impl FakeArgs {
    pub(crate) fn into_driver_config(self) -> FakeDriverConfig {
        let Self {
            scan_fixture,
            read_value,
            notifications,
        } = self;

        FakeDriverConfig::builder()
            .advertisements(scan_fixture)
            .read_values(read_value.map(Into::into).into_iter().collect())
            .notifications(notifications.map(Into::into).unwrap_or_default())
            .build()
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan for advertising peripherals and print what was seen.
    Scan(ScanArgs),
    /// Connect to a peripheral and print its GATT table.
    Inspect(DeviceArgs),
    /// Read one characteristic and print its value.
    Read(CharacteristicArgs),
    /// Write hexadecimal bytes to one characteristic.
    Write(WriteArgs),
    /// Enable notifications on one characteristic and print each value.
    Listen(ListenArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Scan(_) => "scan",
            Self::Inspect(_) => "inspect",
            Self::Read(_) => "read",
            Self::Write(_) => "write",
            Self::Listen(_) => "listen",
        }
    }
}

/// Arguments for the `scan` command.
#[derive(Debug, clap::Args)]
pub struct ScanArgs {
    /// Only report peripherals whose name contains this text, ignoring case.
    #[arg(long)]
    pub name_filter: Option<String>,
    /// How long to scan (e.g. `500ms`, `10s`).
    #[arg(long, default_value = DEFAULT_SCAN_TIMEOUT, value_parser = parse_duration)]
    pub timeout: Duration,
}

impl Default for ScanArgs {
    fn default() -> Self {
        Self {
            name_filter: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Arguments addressing one peripheral.
#[derive(Debug, Clone, clap::Args)]
pub struct DeviceArgs {
    /// Peripheral identifier as reported by `scan`.
    pub device: PeripheralId,
    /// How long to scan for the peripheral before giving up.
    #[arg(long, default_value = DEFAULT_SCAN_TIMEOUT, value_parser = parse_duration)]
    pub scan_timeout: Duration,
}

impl DeviceArgs {
    #[must_use]
    pub fn new(device: impl Into<PeripheralId>) -> Self {
        Self {
            device: device.into(),
            scan_timeout: Duration::from_secs(10),
        }
    }
}

/// Arguments addressing one characteristic.
#[derive(Debug, Clone, clap::Args)]
pub struct CharacteristicArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Service UUID, short (`ffe0`) or full form.
    pub service: String,
    /// Characteristic UUID, short (`ffe1`) or full form.
    pub characteristic: String,
}

impl CharacteristicArgs {
    #[must_use]
    pub fn new(device: impl Into<PeripheralId>, service: &str, characteristic: &str) -> Self {
        Self {
            device: DeviceArgs::new(device),
            service: service.to_string(),
            characteristic: characteristic.to_string(),
        }
    }
}

/// Arguments for the `write` command.
#[derive(Debug, clap::Args)]
pub struct WriteArgs {
    #[command(flatten)]
    pub target: CharacteristicArgs,
    /// Bytes to write as hexadecimal, e.g. `000102ff`.
    pub payload: HexPayload,
}

/// Arguments for the `listen` command.
#[derive(Debug, clap::Args)]
pub struct ListenArgs {
    #[command(flatten)]
    pub target: CharacteristicArgs,
    /// Stop after this many notifications. If omitted, listen until Ctrl+C.
    #[arg(long)]
    pub max_notifications: Option<usize>,
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Rendering used for command output.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn fake_mode_requires_scan_fixture() {
        let result = Args::try_parse_from(["blecentral", "--fake", "scan"]);

        let error = result.expect_err("missing --fake-scan should fail argument parsing");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn fake_fixture_flags_require_fake_mode() {
        let result = Args::try_parse_from(["blecentral", "--fake-read", "DEADBEEF", "scan"]);

        let error = result.expect_err("fake payload flags should require --fake");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn malformed_fixture_is_rejected_at_parse_time() {
        let result = Args::try_parse_from([
            "blecentral",
            "--fake",
            "--fake-scan",
            "AA:BB|Scale",
            "scan",
        ]);

        let error = result.expect_err("fixture without rssi should be rejected");
        assert_eq!(ErrorKind::ValueValidation, error.kind());
    }

    #[test]
    fn scan_timeout_accepts_humantime() {
        let cli = Args::try_parse_from(["blecentral", "scan", "--timeout", "750ms"])
            .expect("scan arguments should parse");

        assert_matches!(cli.command, Command::Scan(ScanArgs { timeout, .. }) if timeout == Duration::from_millis(750));
    }

    #[test]
    fn write_parses_target_and_payload() {
        let cli = Args::try_parse_from([
            "blecentral",
            "write",
            "AA:BB",
            "ffe0",
            "ffe2",
            "000102ff",
            "--scan-timeout",
            "2s",
        ])
        .expect("write arguments should parse");

        let Command::Write(args) = cli.command else {
            panic!("expected write command");
        };
        assert_eq!(PeripheralId::from("AA:BB"), args.target.device.device);
        assert_eq!(Duration::from_secs(2), args.target.device.scan_timeout);
        assert_eq!(vec![0x00, 0x01, 0x02, 0xff], Vec::<u8>::from(args.payload));
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Args::try_parse_from([
            "blecentral",
            "scan",
            "--log-level",
            "debug",
            "--output",
            "json",
        ])
        .expect("global flags should parse after the subcommand");

        assert_eq!(Some(LogLevel::Debug), cli.log_level());
        assert_eq!(Some(OutputFormat::Json), cli.output_format());
    }

    #[test]
    fn fake_mode_builds_fake_settings() {
        let cli = Args::try_parse_from([
            "blecentral",
            "--fake",
            "--fake-scan",
            "AA:BB|KGiTON Scale|-43",
            "scan",
        ])
        .expect("valid fake arguments should parse");

        let (command, fake_args) = cli
            .into_command_and_fake_args()
            .expect("valid fake arguments should resolve fake settings");
        assert_matches!(command, Command::Scan(_));
        assert_matches!(fake_args, Some(_));
    }
}
