use std::sync::Arc;
use std::time::Duration;

use blecentral::{
    Advertisement, BleEvent, Central, CentralConfig, EventStream, FakeCall, FakeDriver,
    FakeDriverConfig, PeripheralId, RadioState, ScanError, ScannedDevice,
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use tokio_stream::StreamExt;

fn advertisement(id: &str, name: Option<&str>, rssi: i16) -> Advertisement {
    Advertisement {
        peripheral: PeripheralId::from(id),
        name: name.map(str::to_string),
        rssi,
        service_hints: Vec::new(),
    }
}

fn scanned(id: &str, name: &str, rssi: i16) -> ScannedDevice {
    ScannedDevice {
        id: PeripheralId::from(id),
        name: name.to_string(),
        rssi,
    }
}

async fn start(config: FakeDriverConfig) -> (Arc<FakeDriver>, Central, EventStream) {
    let driver = Arc::new(FakeDriver::new(config));
    let central = Central::start(driver.clone(), CentralConfig::default())
        .await
        .expect("fake driver should start");
    let events = central.subscribe();
    (driver, central, events)
}

async fn drain(events: &mut EventStream) -> Vec<BleEvent> {
    let mut drained = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(50), events.next()).await
    {
        drained.push(event);
    }
    drained
}

#[tokio::test(start_paused = true)]
async fn scan_announces_new_peripherals_and_large_signal_changes() {
    let (_driver, central, mut events) = start(
        FakeDriverConfig::builder()
            .advertisements(vec![
                advertisement("AA", Some("Thermometer"), -50),
                advertisement("AA", Some("Thermometer"), -53),
                advertisement("BB", None, -70),
                advertisement("AA", Some("Thermometer"), -60),
            ])
            .build(),
    )
    .await;

    central
        .start_scan(None, Duration::from_secs(10))
        .await
        .expect("scan should start");

    assert_eq!(
        vec![
            BleEvent::ScanResult {
                devices: vec![scanned("AA", "Thermometer", -50)],
            },
            BleEvent::ScanResult {
                devices: vec![
                    scanned("AA", "Thermometer", -53),
                    scanned("BB", "Unknown", -70),
                ],
            },
            BleEvent::ScanResult {
                devices: vec![
                    scanned("AA", "Thermometer", -60),
                    scanned("BB", "Unknown", -70),
                ],
            },
        ],
        drain(&mut events).await
    );
    assert_eq!(2, central.discovered_devices().len());
}

#[tokio::test(start_paused = true)]
async fn name_filter_is_case_insensitive_substring() {
    let (driver, central, mut events) = start(
        FakeDriverConfig::builder()
            .advertisements(vec![
                advertisement("AA", Some("KGiTON Scale"), -43),
                advertisement("BB", Some("Speaker"), -65),
                advertisement("CC", None, -70),
            ])
            .build(),
    )
    .await;

    central
        .start_scan(Some("scale"), Duration::from_secs(10))
        .await
        .expect("scan should start");

    assert_eq!(
        vec![BleEvent::ScanResult {
            devices: vec![scanned("AA", "KGiTON Scale", -43)],
        }],
        drain(&mut events).await
    );
    assert_eq!(
        Some(&FakeCall::BeginScan(Some("scale".to_string()))),
        driver.calls().first()
    );
}

#[rstest]
#[case::radio_off(
    FakeDriverConfig::builder().radio_ready(false).build(),
    ScanError::RadioUnavailable
)]
#[case::no_permission(
    FakeDriverConfig::builder().permissions_granted(false).build(),
    ScanError::PermissionDenied
)]
#[case::no_location(
    FakeDriverConfig::builder().location_enabled(false).build(),
    ScanError::LocationServiceDisabled
)]
#[tokio::test]
async fn failed_precondition_prevents_scanning(
    #[case] config: FakeDriverConfig,
    #[case] expected: ScanError,
) {
    let (driver, central, _events) = start(config).await;

    let result = central.start_scan(None, Duration::from_secs(1)).await;

    let error = result.expect_err("scan should be refused");
    assert_eq!(
        std::mem::discriminant(&expected),
        std::mem::discriminant(&error),
        "expected {expected}, got {error}"
    );
    assert!(!central.is_scanning());
    assert!(driver.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn starting_an_active_scan_does_not_restart_it() {
    let (driver, central, _events) = start(FakeDriverConfig::default()).await;

    central
        .start_scan(None, Duration::from_secs(10))
        .await
        .expect("scan should start");
    central
        .start_scan(Some("scale"), Duration::from_secs(10))
        .await
        .expect("second start should succeed");

    assert!(central.is_scanning());
    assert_eq!(vec![FakeCall::BeginScan(None)], driver.calls());
}

#[tokio::test(start_paused = true)]
async fn stopping_twice_is_harmless() {
    let (driver, central, _events) = start(FakeDriverConfig::default()).await;

    central
        .start_scan(None, Duration::from_secs(10))
        .await
        .expect("scan should start");
    central.stop_scan().await.expect("first stop should succeed");
    central.stop_scan().await.expect("second stop should succeed");

    assert!(!central.is_scanning());
    let end_calls = driver
        .calls()
        .into_iter()
        .filter(|call| *call == FakeCall::EndScan)
        .count();
    assert_eq!(1, end_calls);
}

#[tokio::test(start_paused = true)]
async fn scan_stops_itself_after_timeout() {
    let (driver, central, _events) = start(FakeDriverConfig::default()).await;

    central
        .start_scan(None, Duration::from_secs(3))
        .await
        .expect("scan should start");
    assert!(central.is_scanning());

    tokio::time::sleep(Duration::from_secs(4)).await;

    assert!(!central.is_scanning());
    assert!(driver.calls().contains(&FakeCall::EndScan));
}

#[tokio::test(start_paused = true)]
async fn earlier_timeout_does_not_stop_a_later_scan() {
    let (driver, central, _events) = start(FakeDriverConfig::default()).await;

    central
        .start_scan(None, Duration::from_secs(3))
        .await
        .expect("first scan should start");
    tokio::time::sleep(Duration::from_secs(1)).await;
    central.stop_scan().await.expect("first scan should stop");
    central
        .start_scan(None, Duration::from_secs(10))
        .await
        .expect("second scan should start");

    tokio::time::sleep(Duration::from_secs(4)).await;

    assert!(central.is_scanning());
    assert_eq!(
        vec![
            FakeCall::BeginScan(None),
            FakeCall::EndScan,
            FakeCall::BeginScan(None),
        ],
        driver.calls()
    );

    tokio::time::sleep(Duration::from_secs(7)).await;
    assert!(!central.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn new_scan_clears_previous_results() {
    let (_driver, central, mut events) = start(
        FakeDriverConfig::builder()
            .advertisements(vec![advertisement("AA", Some("Thermometer"), -50)])
            .build(),
    )
    .await;

    central
        .start_scan(None, Duration::from_secs(10))
        .await
        .expect("scan should start");
    tokio::time::sleep(Duration::from_millis(10)).await;
    central.stop_scan().await.expect("scan should stop");
    central
        .start_scan(None, Duration::from_secs(10))
        .await
        .expect("scan should restart");

    let announced = drain(&mut events).await;
    assert_eq!(2, announced.len());
    assert_eq!(1, central.discovered_devices().len());
}

#[tokio::test(start_paused = true)]
async fn radio_changes_are_published() {
    let (driver, _central, mut events) = start(FakeDriverConfig::default()).await;

    driver.set_radio_state(RadioState::PoweredOff);

    assert_eq!(
        vec![BleEvent::BluetoothState {
            state: RadioState::PoweredOff,
        }],
        drain(&mut events).await
    );
}

#[tokio::test(start_paused = true)]
async fn driver_scan_failure_is_published_and_ends_the_session() {
    let (driver, central, mut events) = start(FakeDriverConfig::default()).await;
    central
        .start_scan(None, Duration::from_secs(10))
        .await
        .expect("scan should start");

    driver.inject(blecentral::DriverEvent::ScanFailed {
        code: 2,
        message: "registration failed".to_string(),
    });

    assert_eq!(
        vec![BleEvent::ScanError {
            code: 2,
            message: "registration failed".to_string(),
        }],
        drain(&mut events).await
    );
    assert!(!central.is_scanning());
}
