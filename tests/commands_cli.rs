use clap::Parser;
use insta::assert_snapshot;
use pretty_assertions::assert_eq;
use serde_json::Value;

#[derive(Debug, Default)]
struct FakeTerminalClient;

impl blecentral::TerminalClient for FakeTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }
}

async fn run_with_parsed_args(
    args: blecentral::Args,
    output_format: blecentral::OutputFormat,
) -> anyhow::Result<String> {
    let mut output = Vec::new();
    let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
    let driver = match maybe_fake_args {
        Some(fake_args) => blecentral::fake_driver(fake_args).await?,
        None => blecentral::real_driver().await?,
    };
    blecentral::run_with_clients(
        command,
        &mut output,
        &FakeTerminalClient,
        driver,
        output_format,
    )
    .await?;
    Ok(String::from_utf8(output)?)
}

async fn run_with_argv<const N: usize>(argv: [&str; N]) -> anyhow::Result<String> {
    let parsed_args = blecentral::Args::try_parse_from(argv)?;
    run_with_parsed_args(parsed_args, blecentral::OutputFormat::Pretty).await
}

async fn run_json<const N: usize>(argv: [&str; N]) -> anyhow::Result<Value> {
    let parsed_args = blecentral::Args::try_parse_from(argv)?;
    let stdout = run_with_parsed_args(parsed_args, blecentral::OutputFormat::Json).await?;
    Ok(serde_json::from_str(&stdout)?)
}

#[tokio::test(start_paused = true)]
async fn scan_command_prints_every_advertising_peripheral() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "blecentral",
        "--fake",
        "--fake-scan",
        "AA:BB|Thermometer|-43;CC:DD|-|-90",
        "scan",
        "--timeout",
        "2s",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @"
    Found 2 peripheral(s):
    ╭───────┬─────────────┬─────────╮
    │ id    │ name        │ rssi    │
    ├───────┼─────────────┼─────────┤
    │ AA:BB │ Thermometer │ -43 dBm │
    │ CC:DD │ Unknown     │ -90 dBm │
    ╰───────┴─────────────┴─────────╯
    ");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn scan_command_applies_name_filter_in_json_output() -> anyhow::Result<()> {
    let report = run_json([
        "blecentral",
        "--fake",
        "--fake-scan",
        "AA:BB|Thermometer|-43;CC:DD|Speaker|-65",
        "scan",
        "--name-filter",
        "THERMO",
        "--timeout",
        "1s",
    ])
    .await?;

    let devices = report["devices"]
        .as_array()
        .expect("devices should be an array");
    assert_eq!(1, devices.len());
    assert_eq!("AA:BB", devices[0]["id"]);
    assert_eq!("Thermometer", devices[0]["name"]);
    assert_eq!(-43, devices[0]["rssi"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn scan_command_reports_an_empty_scan() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "blecentral",
        "--fake",
        "--fake-scan",
        "AA:BB|Thermometer|-43",
        "scan",
        "--name-filter",
        "scale",
        "--timeout",
        "1s",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @"No peripherals found.");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn inspect_command_prints_the_gatt_table() -> anyhow::Result<()> {
    let fake = blecentral::FakeArgs::builder()
        .scan_fixture("CC:DD|Speaker|-65;AA:BB|Thermometer|-43")?
        .build();
    let args = blecentral::Args::new(blecentral::Command::Inspect(
        blecentral::DeviceArgs::new("AA:BB"),
    ))
    .with_fake(fake);

    let stdout = run_with_parsed_args(args, blecentral::OutputFormat::Pretty).await?;

    assert_snapshot!(stdout.trim_end(), @"
    Connected device:
    ╭─────────────────┬───────╮
    │ field           │ value │
    ├─────────────────┼───────┤
    │ device          │ AA:BB │
    │ services        │ 2     │
    │ characteristics │ 3     │
    ╰─────────────────┴───────╯

    Service 0000180a-0000-1000-8000-00805f9b34fb (primary)
    ╭──────────────────────────────────────┬──────┬───────┬──────────────────────┬────────┬──────────╮
    │ characteristic                       │ read │ write │ writeWithoutResponse │ notify │ indicate │
    ├──────────────────────────────────────┼──────┼───────┼──────────────────────┼────────┼──────────┤
    │ 00002a29-0000-1000-8000-00805f9b34fb │ ✓    │       │                      │        │          │
    ╰──────────────────────────────────────┴──────┴───────┴──────────────────────┴────────┴──────────╯

    Service 0000ffe0-0000-1000-8000-00805f9b34fb (primary)
    ╭──────────────────────────────────────┬──────┬───────┬──────────────────────┬────────┬──────────╮
    │ characteristic                       │ read │ write │ writeWithoutResponse │ notify │ indicate │
    ├──────────────────────────────────────┼──────┼───────┼──────────────────────┼────────┼──────────┤
    │ 0000ffe1-0000-1000-8000-00805f9b34fb │ ✓    │       │                      │ ✓      │          │
    │ 0000ffe2-0000-1000-8000-00805f9b34fb │      │ ✓     │ ✓                    │        │          │
    ╰──────────────────────────────────────┴──────┴───────┴──────────────────────┴────────┴──────────╯
    ");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn inspect_command_emits_services_as_json() -> anyhow::Result<()> {
    let report = run_json([
        "blecentral",
        "--fake",
        "--fake-scan",
        "AA:BB|Thermometer|-43",
        "inspect",
        "AA:BB",
    ])
    .await?;

    assert_eq!("AA:BB", report["device"]);
    let services = report["services"]
        .as_array()
        .expect("services should be an array");
    assert_eq!(2, services.len());
    assert_eq!(
        "0000ffe0-0000-1000-8000-00805f9b34fb",
        services[1]["uuid"]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn read_command_prints_value_as_hex() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "blecentral",
        "--fake",
        "--fake-scan",
        "AA:BB|Thermometer|-43",
        "--fake-read",
        "DEADBEEF",
        "read",
        "AA:BB",
        "ffe0",
        "ffe1",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @"
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
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn read_command_emits_json_value() -> anyhow::Result<()> {
    let parsed_args = blecentral::Args::try_parse_from([
        "blecentral",
        "--fake",
        "--fake-scan",
        "AA:BB|Thermometer|-43",
        "--fake-read",
        "0a0b",
        "read",
        "AA:BB",
        "FFE0",
        "FFE1",
    ])?;
    let stdout = run_with_parsed_args(parsed_args, blecentral::OutputFormat::Json).await?;

    assert_snapshot!(stdout.trim_end(), @r#"
    {
      "device": "AA:BB",
      "serviceUuid": "0000ffe0-0000-1000-8000-00805f9b34fb",
      "charUuid": "0000ffe1-0000-1000-8000-00805f9b34fb",
      "value": "0a0b",
      "length": 2
    }
    "#);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn write_command_reports_bytes_written() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "blecentral",
        "--fake",
        "--fake-scan",
        "AA:BB|Thermometer|-43",
        "write",
        "AA:BB",
        "ffe0",
        "ffe2",
        "000102ff",
    ])
    .await?;

    assert_snapshot!(
        stdout.trim_end(),
        @"Wrote 4 byte(s) to 0000ffe2-0000-1000-8000-00805f9b34fb"
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn listen_command_streams_notifications_until_the_limit() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "blecentral",
        "--fake",
        "--fake-scan",
        "AA:BB|Thermometer|-43",
        "--fake-notifications",
        "0500,0600,0700",
        "listen",
        "AA:BB",
        "ffe0",
        "ffe1",
        "--max-notifications",
        "2",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @"
    Listen session:
    ╭──────────────┬──────────────────────────────────────╮
    │ field        │ value                                │
    ├──────────────┼──────────────────────────────────────┤
    │ device       │ AA:BB                                │
    │ listening_on │ 0000ffe1-0000-1000-8000-00805f9b34fb │
    │ capabilities │ read,notify                          │
    ╰──────────────┴──────────────────────────────────────╯
    [0001] 05 00
    [0002] 06 00

    Stopped: reached notification limit - received 2 notification(s)
    ");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn listen_command_with_zero_limit_stops_immediately() -> anyhow::Result<()> {
    let parsed_args = blecentral::Args::try_parse_from([
        "blecentral",
        "--fake",
        "--fake-scan",
        "AA:BB|Thermometer|-43",
        "listen",
        "AA:BB",
        "ffe0",
        "ffe1",
        "--max-notifications",
        "0",
    ])?;
    let stdout = run_with_parsed_args(parsed_args, blecentral::OutputFormat::Json).await?;

    let summary: Value = serde_json::from_str(stdout.trim_end())?;
    assert_eq!(0, summary["received"]);
    assert_eq!("reachedLimit", summary["stopReason"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn commands_fail_when_the_device_never_advertises() {
    let result = run_with_argv([
        "blecentral",
        "--fake",
        "--fake-scan",
        "AA:BB|Thermometer|-43",
        "read",
        "11:22",
        "ffe0",
        "ffe1",
        "--scan-timeout",
        "2s",
    ])
    .await;

    let error = result.expect_err("unknown device should fail");
    assert_eq!(
        "device `11:22` was not seen before the scan timed out",
        error.to_string()
    );
}

#[tokio::test(start_paused = true)]
async fn read_command_reports_missing_characteristic() {
    let result = run_with_argv([
        "blecentral",
        "--fake",
        "--fake-scan",
        "AA:BB|Thermometer|-43",
        "read",
        "AA:BB",
        "ffe0",
        "ffe9",
    ])
    .await;

    let error = result.expect_err("missing characteristic should fail");
    assert!(error.to_string().contains("was not found in service"));
}

#[test]
fn fake_fixture_validation_rejects_malformed_records() {
    let result = blecentral::FakeArgs::builder().scan_fixture("invalid-record");
    assert!(matches!(
        result,
        Err(blecentral::FixtureError::InvalidRecordFieldCount)
    ));
}
