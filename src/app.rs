use std::io;
use std::sync::Arc;

use anyhow::Result;
use tracing::instrument;

use crate::central::{Central, CentralConfig};
use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat};
use crate::error::DriverError;
use crate::hw::{BleDriver, DriverBackend, driver_from_backend};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Creates a driver backed by the first Bluetooth adapter on this machine.
///
/// # Errors
///
/// Returns an error when no adapter is available.
pub async fn real_driver() -> Result<Arc<dyn BleDriver>, DriverError> {
    driver_from_backend(DriverBackend::Real).await
}

/// Creates a driver backed by in-memory fixtures.
///
/// # Errors
///
/// Never fails for fixture input that already parsed.
pub async fn fake_driver(fake_args: FakeArgs) -> Result<Arc<dyn BleDriver>, DriverError> {
    driver_from_backend(DriverBackend::Fake(fake_args.into_driver_config())).await
}

/// Runs the CLI command against `driver`.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = blecentral::Args::try_parse_from([
///     "blecentral",
///     "--fake",
///     "--fake-scan",
///     "AA:BB|Thermometer|-43",
///     "scan",
///     "--timeout",
///     "10ms",
/// ])?;
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let driver = match maybe_fake_args {
///     Some(fake_args) => blecentral::fake_driver(fake_args).await?,
///     None => blecentral::real_driver().await?,
/// };
/// let mut out = Vec::new();
/// blecentral::run(command, &mut out, driver, blecentral::OutputFormat::Json).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
pub async fn run<W>(
    command: Command,
    out: &mut W,
    driver: Arc<dyn BleDriver>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_log_level(command, out, driver, None, output_format).await
}

/// Runs the CLI command with an explicit telemetry log-level override.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
pub async fn run_with_log_level<W>(
    command: Command,
    out: &mut W,
    driver: Arc<dyn BleDriver>,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(
        command,
        out,
        &SystemTerminalClient,
        driver,
        log_level,
        output_format,
    )
    .await
}

/// Runs the CLI command with injected clients.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    driver: Arc<dyn BleDriver>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(command, out, terminal_client, driver, None, output_format)
        .await
}

/// Runs the CLI command with injected clients and explicit telemetry settings.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// struct FakeTerminal;
/// impl blecentral::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let fake = blecentral::FakeArgs::builder()
///     .scan_fixture("AA:BB|Thermometer|-43")?
///     .build();
/// let command = blecentral::Command::Inspect(blecentral::DeviceArgs::new("AA:BB"));
/// let mut out = Vec::new();
/// blecentral::run_with_clients_and_log_level(
///     command,
///     &mut out,
///     &FakeTerminal,
///     blecentral::fake_driver(fake).await?,
///     Some(blecentral::LogLevel::Trace),
///     blecentral::OutputFormat::Pretty,
/// ).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
#[instrument(
    skip(out, terminal_client, driver),
    level = "info",
    fields(command = %command.name(), ?log_level, ?output_format)
)]
pub async fn run_with_clients_and_log_level<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    driver: Arc<dyn BleDriver>,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "blecentral",
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    let central = Central::start(driver, CentralConfig::default()).await?;
    match command {
        Command::Scan(args) => {
            crate::cli::scan::run(&central, &args, out, terminal_client, output_format).await
        }
        Command::Inspect(args) => {
            crate::cli::inspect::run(central, &args, out, terminal_client, output_format).await
        }
        Command::Read(args) => {
            crate::cli::gatt::read(central, &args, out, terminal_client, output_format).await
        }
        Command::Write(args) => {
            crate::cli::gatt::write(central, &args, out, terminal_client, output_format).await
        }
        Command::Listen(args) => {
            crate::cli::listen::run(central, &args, out, terminal_client, output_format).await
        }
    }
}
