use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use blecentral::{
    Advertisement, BleEvent, Capability, Central, CentralConfig, ConnectError, ConnectionState,
    DisconnectError, DriverCharacteristic, DriverEvent, EventStream,
    FAKE_NOTIFY_CHARACTERISTIC_UUID, FAKE_SERVICE_UUID, FakeCall, FakeDriver, FakeDriverConfig,
    OperationError, PeripheralId,
};
use pretty_assertions::assert_eq;
use tokio_stream::StreamExt;

const DEVICE: &str = "AA:BB:CC";

fn device() -> PeripheralId {
    PeripheralId::from(DEVICE)
}

fn advertised() -> Vec<Advertisement> {
    vec![Advertisement {
        peripheral: device(),
        name: Some("Thermometer".to_string()),
        rssi: -48,
        service_hints: Vec::new(),
    }]
}

/// Starts a central whose registry already knows [`DEVICE`].
async fn scanned(config: FakeDriverConfig) -> (Arc<FakeDriver>, Central, EventStream) {
    let driver = Arc::new(FakeDriver::new(config));
    let central = Central::start(driver.clone(), CentralConfig::default())
        .await
        .expect("fake driver should start");
    central
        .start_scan(None, Duration::from_secs(10))
        .await
        .expect("scan should start");
    tokio::time::sleep(Duration::from_millis(10)).await;
    central.stop_scan().await.expect("scan should stop");
    let events = central.subscribe();
    (driver, central, events)
}

async fn connection_states(events: &mut EventStream) -> Vec<ConnectionState> {
    let mut states = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(50), events.next()).await
    {
        if let BleEvent::ConnectionState { device_id, state } = event {
            assert_eq!(device(), device_id);
            states.push(state);
        }
    }
    states
}

#[tokio::test(start_paused = true)]
async fn connecting_to_an_unseen_peripheral_is_rejected() {
    let (driver, central, _events) = scanned(FakeDriverConfig::default()).await;

    let result = central.connect(&device()).await;

    assert_matches!(result, Err(ConnectError::DeviceNotFound { peripheral }) if peripheral == device());
    assert!(
        !driver
            .calls()
            .iter()
            .any(|call| matches!(call, FakeCall::Connect(_)))
    );
}

#[tokio::test(start_paused = true)]
async fn connect_and_disconnect_report_every_transition() {
    let (driver, central, mut events) = scanned(
        FakeDriverConfig::builder()
            .advertisements(advertised())
            .build(),
    )
    .await;

    central.connect(&device()).await.expect("connect should be issued");
    assert_eq!(
        vec![ConnectionState::Connecting, ConnectionState::Connected],
        connection_states(&mut events).await
    );
    assert_eq!(
        Some(ConnectionState::Connected),
        central.connection_state(&device())
    );

    central
        .disconnect(&device())
        .await
        .expect("disconnect should be issued");
    assert_eq!(
        vec![ConnectionState::Disconnecting, ConnectionState::Disconnected],
        connection_states(&mut events).await
    );
    assert_eq!(None, central.connection_state(&device()));
    assert_eq!(1, driver.release_count(&device()));
}

#[tokio::test(start_paused = true)]
async fn connecting_twice_keeps_the_live_connection() {
    let (driver, central, mut events) = scanned(
        FakeDriverConfig::builder()
            .advertisements(advertised())
            .build(),
    )
    .await;

    central.connect(&device()).await.expect("connect should be issued");
    central
        .connect(&device())
        .await
        .expect("second connect should be a no-op");

    assert_eq!(
        vec![ConnectionState::Connecting, ConnectionState::Connected],
        connection_states(&mut events).await
    );
    let connects = driver
        .calls()
        .iter()
        .filter(|call| matches!(call, FakeCall::Connect(_)))
        .count();
    assert_eq!(1, connects);
}

#[tokio::test(start_paused = true)]
async fn refused_connect_tears_the_connection_down() {
    let (driver, central, mut events) = scanned(
        FakeDriverConfig::builder()
            .advertisements(advertised())
            .reject_connect(true)
            .build(),
    )
    .await;

    let result = central.connect(&device()).await;

    assert_matches!(result, Err(ConnectError::ConnectionFailed { .. }));
    assert_eq!(
        vec![ConnectionState::Connecting, ConnectionState::Disconnected],
        connection_states(&mut events).await
    );
    assert_eq!(None, central.connection_state(&device()));
    assert_eq!(1, driver.release_count(&device()));
}

#[tokio::test(start_paused = true)]
async fn asynchronous_connect_failure_reports_disconnected() {
    let (driver, central, mut events) = scanned(
        FakeDriverConfig::builder()
            .advertisements(advertised())
            .auto_connect(false)
            .build(),
    )
    .await;

    central.connect(&device()).await.expect("connect should be issued");
    driver.inject(DriverEvent::ConnectFailed {
        peripheral: device(),
        reason: "GATT error 133".to_string(),
    });

    assert_eq!(
        vec![ConnectionState::Connecting, ConnectionState::Disconnected],
        connection_states(&mut events).await
    );
    assert_eq!(1, driver.release_count(&device()));
}

#[tokio::test(start_paused = true)]
async fn refused_disconnect_still_closes_locally() {
    let (driver, central, mut events) = scanned(
        FakeDriverConfig::builder()
            .advertisements(advertised())
            .reject_disconnect(true)
            .build(),
    )
    .await;
    central.connect(&device()).await.expect("connect should be issued");
    let _ = connection_states(&mut events).await;

    let result = central.disconnect(&device()).await;

    assert_matches!(result, Err(DisconnectError::Driver { .. }));
    assert_eq!(
        vec![ConnectionState::Disconnecting, ConnectionState::Disconnected],
        connection_states(&mut events).await
    );
    assert_eq!(None, central.connection_state(&device()));
    assert_eq!(1, driver.release_count(&device()));
}

#[tokio::test(start_paused = true)]
async fn disconnecting_an_idle_peripheral_succeeds() {
    let (driver, central, _events) = scanned(
        FakeDriverConfig::builder()
            .advertisements(advertised())
            .build(),
    )
    .await;

    central
        .disconnect(&device())
        .await
        .expect("disconnecting without a connection should succeed");

    assert!(
        !driver
            .calls()
            .iter()
            .any(|call| matches!(call, FakeCall::Disconnect(_)))
    );
}

#[tokio::test(start_paused = true)]
async fn link_loss_cleans_up_once_and_rejects_later_operations() {
    let (driver, central, mut events) = scanned(
        FakeDriverConfig::builder()
            .advertisements(advertised())
            .build(),
    )
    .await;
    central.connect(&device()).await.expect("connect should be issued");
    let _ = connection_states(&mut events).await;

    driver.inject(DriverEvent::Disconnected(device()));
    driver.inject(DriverEvent::Disconnected(device()));

    assert_eq!(
        vec![ConnectionState::Disconnected],
        connection_states(&mut events).await
    );
    assert_eq!(1, driver.release_count(&device()));

    let result = central
        .read(&device(), FAKE_SERVICE_UUID, FAKE_NOTIFY_CHARACTERISTIC_UUID)
        .await;
    assert_eq!(
        Err(OperationError::NotConnected {
            peripheral: device()
        }),
        result
    );
}

#[tokio::test(start_paused = true)]
async fn peripheral_can_reconnect_after_disconnecting() {
    let (driver, central, mut events) = scanned(
        FakeDriverConfig::builder()
            .advertisements(advertised())
            .build(),
    )
    .await;
    central.connect(&device()).await.expect("connect should be issued");
    let _ = connection_states(&mut events).await;
    central
        .disconnect(&device())
        .await
        .expect("disconnect should be issued");
    let _ = connection_states(&mut events).await;

    central
        .connect(&device())
        .await
        .expect("reconnect should be issued");

    assert_eq!(
        vec![ConnectionState::Connecting, ConnectionState::Connected],
        connection_states(&mut events).await
    );
    assert_eq!(1, driver.release_count(&device()));
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_connections_and_forgets_peripherals() {
    let (driver, central, mut events) = scanned(
        FakeDriverConfig::builder()
            .advertisements(advertised())
            .build(),
    )
    .await;
    central.connect(&device()).await.expect("connect should be issued");
    let _ = connection_states(&mut events).await;

    central.shutdown().await;

    assert_eq!(
        vec![ConnectionState::Disconnected],
        connection_states(&mut events).await
    );
    assert_eq!(1, driver.release_count(&device()));
    assert!(central.discovered_devices().is_empty());
    assert_matches!(
        central.connect(&device()).await,
        Err(ConnectError::DeviceNotFound { .. })
    );
}

#[tokio::test(start_paused = true)]
async fn late_discovery_results_do_not_revive_a_closing_connection() {
    let (driver, central, mut events) = scanned(
        FakeDriverConfig::builder()
            .advertisements(advertised())
            .enumerate_per_service(true)
            .withheld_services(vec![FAKE_SERVICE_UUID.to_string()])
            .build(),
    )
    .await;
    central.connect(&device()).await.expect("connect should be issued");
    let _ = connection_states(&mut events).await;

    let peer = device();
    let (discovery, disconnect) = tokio::join!(central.discover_services(&peer), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        driver.inject(DriverEvent::CharacteristicsDiscovered {
            peripheral: device(),
            service_uuid: FAKE_SERVICE_UUID.to_string(),
            characteristics: vec![DriverCharacteristic {
                uuid: FAKE_NOTIFY_CHARACTERISTIC_UUID.to_string(),
                capabilities: vec![Capability::Notify],
            }],
        });
        central.disconnect(&device()).await
    });

    disconnect.expect("disconnect should be issued");
    assert_eq!(Err(OperationError::Cancelled), discovery);
    assert_eq!(
        vec![
            ConnectionState::DiscoveringServices,
            ConnectionState::Disconnecting,
            ConnectionState::Disconnected,
        ],
        connection_states(&mut events).await
    );
    assert_eq!(1, driver.release_count(&device()));
}

#[tokio::test(start_paused = true)]
async fn dropping_the_central_releases_live_connections() {
    let (driver, central, mut events) = scanned(
        FakeDriverConfig::builder()
            .advertisements(advertised())
            .build(),
    )
    .await;
    central.connect(&device()).await.expect("connect should be issued");
    let _ = connection_states(&mut events).await;

    drop(central);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(1, driver.release_count(&device()));
}
