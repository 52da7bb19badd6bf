//! End-to-end gateway runs against mock peripherals and a scripted
//! serial controller.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};

use sensorgate_core::bridge::protocol::{END, HEALTH_TS, PAYLOAD, PING, TOPIC};
use sensorgate_core::mock::{MockConnector, MockLink, MockSerial, SerialEvent};
use sensorgate_core::{BridgeOptions, WorkerState};
use sensorgate_service::{BleDeviceConfig, Config, Gateway, GatewayError};
use sensorgate_store::Store;

const AMBIENT_LINE: &[u8] = b"{\"gas\":120,\"temp\":21.5,\"hum\":40.2,\"pres\":1013.1}\r\n";

fn config(health: bool) -> Config {
    let mut config = Config::default();
    config.gateway.id = "truck-01".to_string();
    config.health.enabled = health;
    let mut device = BleDeviceConfig::new("bluno-1", "AA:BB:CC:DD:EE:FF");
    device.sensor_id = Some("ambiente1".to_string());
    device.sensor_numeric_id = "a01".to_string();
    config.ble.devices.push(device);
    config
}

async fn wait_for<F: FnMut() -> bool>(what: &str, mut done: F) {
    let deadline = Instant::now() + Duration::from_secs(120);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_record_reaches_uplink_and_store() {
    let link = MockLink::bluno();
    link.push_chunk(&AMBIENT_LINE[..20]);
    link.push_chunk(&AMBIENT_LINE[20..]);
    let connector = Arc::new(MockConnector::new().then_link(&link));
    let serial = MockSerial::new();

    let gateway = Gateway::start(
        &config(false),
        connector,
        Box::new(serial.clone()),
        Store::open_in_memory().unwrap(),
        BridgeOptions::default(),
    )
    .await
    .unwrap();

    wait_for("publish", || serial.written().contains(&END.to_string())).await;

    let written = serial.written();
    assert_eq!(written.len(), 5);
    assert_eq!(written[0], TOPIC);
    assert_eq!(written[1], "fleet/truck-01/amb/a01");
    assert_eq!(written[2], PAYLOAD);
    assert!(written[3].starts_with("{\"ts\":"), "payload: {}", written[3]);
    assert!(written[3].ends_with(",\"temp\":21.5,\"hum\":40.2,\"pres\":1013.1}"));

    let store = Arc::clone(gateway.store());
    let mut stored = 0;
    for _ in 0..100 {
        stored = store.lock().await.count_readings(Some("ambiente1")).unwrap();
        if stored == 1 {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(stored, 1);
    let reading = store.lock().await.latest_reading("ambiente1").unwrap().unwrap();
    assert_eq!(reading.device, "bluno-1");
    assert_eq!(reading.payload["gas"], 120);

    assert_eq!(gateway.publisher_stats().published, 1);
    assert_eq!(
        gateway.worker_states(),
        vec![("bluno-1".to_string(), WorkerState::Streaming)]
    );

    gateway.shutdown().await;
    assert_eq!(
        gateway.worker_states(),
        vec![("bluno-1".to_string(), WorkerState::Stopped)]
    );
    assert_eq!(serial.closes(), 1);
    assert_eq!(link.disconnects(), 1);

    // A second shutdown is a no-op.
    gateway.shutdown().await;
    assert_eq!(serial.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_published_on_health_topic() {
    let connector = Arc::new(MockConnector::new());
    let serial = MockSerial::new()
        .reply(PING, "PONG")
        .reply_after(HEALTH_TS, Duration::from_millis(100), "OK")
        .reply_after(HEALTH_TS, Duration::from_millis(150), "12,-95,LTE,0x1A2B,0x0102");
    let mut config = config(true);
    config.ble.devices.clear();

    let gateway = Gateway::start(
        &config,
        connector,
        Box::new(serial.clone()),
        Store::open_in_memory().unwrap(),
        BridgeOptions::default(),
    )
    .await
    .unwrap();

    wait_for("heartbeat", || serial.written().contains(&END.to_string())).await;

    let written = serial.written();
    let topic_at = written.iter().position(|l| l == TOPIC).unwrap();
    assert_eq!(written[topic_at + 1], "fleet/truck-01/health");
    let heartbeat: serde_json::Value = serde_json::from_str(&written[topic_at + 3]).unwrap();
    assert_eq!(heartbeat["schema"], "v1");
    assert_eq!(heartbeat["gateway_id"], "truck-01");
    assert_eq!(heartbeat["health"]["link"]["reachable"], true);
    assert_eq!(heartbeat["health"]["link"]["rsrp"], "-95");
    assert_eq!(heartbeat["health"]["link"]["type"], "LTE");

    // Probe, then health command (token and timestamp), then publish.
    assert_eq!(written[0], PING);
    assert_eq!(written[1], HEALTH_TS);
    assert!(written[2].parse::<i64>().is_ok());

    gateway.shutdown().await;
    assert_eq!(serial.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_order_closes_serial_last() {
    let link = MockLink::bluno();
    let connector = Arc::new(MockConnector::new().then_link(&link));
    let serial = MockSerial::new();

    let gateway = Gateway::start(
        &config(false),
        connector,
        Box::new(serial.clone()),
        Store::open_in_memory().unwrap(),
        BridgeOptions::default(),
    )
    .await
    .unwrap();

    wait_for("streaming", || {
        gateway.worker_states()[0].1 == WorkerState::Streaming
    })
    .await;
    gateway.shutdown().await;

    assert_eq!(link.disconnects(), 1);
    assert_eq!(serial.trace().last(), Some(&SerialEvent::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_start_rejects_unknown_sensor_class() {
    let mut config = config(false);
    config.ble.devices[0].sensor_type = "thermo".to_string();
    let serial = MockSerial::new();

    let err = Gateway::start(
        &config,
        Arc::new(MockConnector::new()),
        Box::new(serial.clone()),
        Store::open_in_memory().unwrap(),
        BridgeOptions::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, GatewayError::Config(_)));
    assert_eq!(serial.opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_fails_when_serial_cannot_open() {
    let serial = MockSerial::new();
    serial.fail_next_opens(1);

    let err = Gateway::start(
        &config(false),
        Arc::new(MockConnector::new()),
        Box::new(serial),
        Store::open_in_memory().unwrap(),
        BridgeOptions::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, GatewayError::Bridge(_)));
}
