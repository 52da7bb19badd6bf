//! Device link worker behaviour against scripted GATT links.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};

use sensorgate_core::mock::{LinkWrite, MOCK_CCCD_HANDLE, MockConnector, MockLink};
use sensorgate_core::uuids::{BLUNO_COMMAND, BLUNO_SERIAL};
use sensorgate_core::worker::{enable_notifications, locate_cccd};
use sensorgate_core::{
    DecodedRecord, DeviceConfig, DeviceWorker, GattLink, LinkConnector, Measurement, RecordSinks,
    SensorClass, WorkerState,
};

const LINE: &[u8] = b"{\"gas\":120,\"temp\":21.5,\"hum\":40.2,\"pres\":1013.1}\r\n";

fn config() -> DeviceConfig {
    DeviceConfig::new("bluno-1", "AA:BB:CC:DD:EE:FF")
        .sensor("ambiente1", SensorClass::Ambient, "a01")
        .reconnect_delay(Duration::from_secs(5))
}

fn sinks(
    capacity: usize,
) -> (
    RecordSinks,
    mpsc::Receiver<DecodedRecord>,
    mpsc::Receiver<DecodedRecord>,
) {
    let (telemetry, telemetry_rx) = mpsc::channel(capacity);
    let (persistence, persistence_rx) = mpsc::channel(capacity);
    (
        RecordSinks {
            telemetry,
            persistence,
        },
        telemetry_rx,
        persistence_rx,
    )
}

async fn next(rx: &mut mpsc::Receiver<DecodedRecord>) -> DecodedRecord {
    timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("record within a minute")
        .expect("channel open")
}

#[tokio::test(start_paused = true)]
async fn test_streams_records_to_both_queues() {
    let link = MockLink::bluno();
    link.push_chunk(b"{\"gas\":120,\"temp\":21.5,");
    link.push_chunk(b"\"hum\":40.2,\"pres\":1013.1}\r\n");
    let connector = Arc::new(MockConnector::new().then_link(&link));
    let (sinks, mut telemetry, mut persistence) = sinks(8);

    let worker = DeviceWorker::spawn(config(), connector.clone(), sinks);
    let record = next(&mut telemetry).await;
    assert_eq!(record.device, "bluno-1");
    assert_eq!(record.sensor_id, "ambiente1");
    assert_eq!(record.sensor_numeric_id, "a01");
    assert_eq!(
        record.measurement,
        Measurement::Ambient {
            gas: 120.0,
            temperature: 21.5,
            humidity: 40.2,
            pressure: 1013.1,
        }
    );
    assert_eq!(next(&mut persistence).await, record);
    assert_eq!(worker.state(), WorkerState::Streaming);

    worker.stop().await;
    assert_eq!(worker.state(), WorkerState::Stopped);

    assert_eq!(
        link.writes(),
        vec![
            LinkWrite::Characteristic {
                uuid: BLUNO_COMMAND,
                data: b"AT+PASSWORD=DFRobot\r\n".to_vec(),
            },
            LinkWrite::Characteristic {
                uuid: BLUNO_COMMAND,
                data: b"AT+CURRUART=115200\r\n".to_vec(),
            },
            LinkWrite::Descriptor {
                handle: MOCK_CCCD_HANDLE,
                value: vec![1, 0],
            },
        ]
    );
    assert_eq!(connector.attempts(), 1);
    assert_eq!(worker.stats().records, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent_and_cleans_up_once() {
    let link = MockLink::bluno();
    let connector = Arc::new(MockConnector::new().then_link(&link));
    let (sinks, _telemetry, _persistence) = sinks(8);

    let worker = DeviceWorker::spawn(config(), connector, sinks);
    let mut state = worker.subscribe_state();
    timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == WorkerState::Streaming),
    )
    .await
    .unwrap()
    .unwrap();

    worker.stop().await;
    worker.stop().await;

    assert_eq!(worker.state(), WorkerState::Stopped);
    assert_eq!(link.disconnects(), 1);
    assert_eq!(worker.stats().cleanups, 1);
    assert!(!link.handler_installed());
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_link_loss() {
    let first = MockLink::bluno();
    first.push_drop();
    let second = MockLink::bluno();
    second.push_chunk(LINE);
    let connector = Arc::new(MockConnector::new().then_link(&first).then_link(&second));
    let (sinks, mut telemetry, _persistence) = sinks(8);

    let started = Instant::now();
    let worker = DeviceWorker::spawn(config(), connector.clone(), sinks);
    next(&mut telemetry).await;

    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(connector.attempts(), 2);
    assert_eq!(first.disconnects(), 1);

    worker.stop().await;
    let stats = worker.stats();
    assert_eq!(stats.connections, 2);
    assert_eq!(stats.cleanups, 2);
    assert_eq!(second.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retries_failed_connect() {
    let link = MockLink::bluno();
    link.push_chunk(LINE);
    let connector = Arc::new(MockConnector::new().then_fail().then_fail().then_link(&link));
    let (sinks, mut telemetry, _persistence) = sinks(8);

    let worker = DeviceWorker::spawn(config(), connector.clone(), sinks);
    next(&mut telemetry).await;
    assert_eq!(connector.attempts(), 3);
    // Failed connects leave nothing to clean up.
    worker.stop().await;
    assert_eq!(worker.stats().cleanups, 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_notify_property_fails_attempt() {
    let link = MockLink::new().with_characteristic(BLUNO_SERIAL, 0x0010, false);
    let connector = Arc::new(MockConnector::new().then_link(&link));
    let (sinks, _telemetry, _persistence) = sinks(8);

    let worker = DeviceWorker::spawn(config(), connector.clone(), sinks);
    tokio::time::sleep(Duration::from_secs(12)).await;
    worker.stop().await;

    assert!(connector.attempts() >= 2);
    assert_eq!(link.disconnects(), 1);
    assert!(link.writes().is_empty());
    assert_eq!(worker.stats().connections, 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_command_endpoint_still_streams() {
    let link = MockLink::new().with_characteristic(BLUNO_SERIAL, 0x0010, true);
    link.push_chunk(LINE);
    let connector = Arc::new(MockConnector::new().then_link(&link));
    let (sinks, mut telemetry, _persistence) = sinks(8);

    let worker = DeviceWorker::spawn(config(), connector, sinks);
    next(&mut telemetry).await;
    worker.stop().await;

    // No auth writes; notifications enabled at the fallback CCCD.
    assert_eq!(
        link.writes(),
        vec![LinkWrite::Descriptor {
            handle: 0x0011,
            value: vec![1, 0],
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_lines_are_dropped() {
    let link = MockLink::bluno();
    link.push_chunk(b"garbage\n{\"gas\":1}\n");
    link.push_chunk(LINE);
    let connector = Arc::new(MockConnector::new().then_link(&link));
    let (sinks, mut telemetry, _persistence) = sinks(8);

    let worker = DeviceWorker::spawn(config(), connector, sinks);
    let record = next(&mut telemetry).await;
    assert_eq!(record.sensor_class(), SensorClass::Ambient);
    worker.stop().await;

    let stats = worker.stats();
    assert_eq!(stats.lines, 3);
    assert_eq!(stats.decode_errors, 2);
    assert_eq!(stats.records, 1);
}

#[tokio::test(start_paused = true)]
async fn test_full_sink_drops_records() {
    let link = MockLink::bluno();
    for _ in 0..3 {
        link.push_chunk(LINE);
    }
    let connector = Arc::new(MockConnector::new().then_link(&link));
    let (telemetry, _telemetry_rx) = mpsc::channel(1);
    let (persistence, mut persistence_rx) = mpsc::channel(8);

    let worker = DeviceWorker::spawn(
        config(),
        connector,
        RecordSinks {
            telemetry,
            persistence,
        },
    );
    for _ in 0..3 {
        next(&mut persistence_rx).await;
    }
    worker.stop().await;

    let stats = worker.stats();
    assert_eq!(stats.records, 3);
    assert_eq!(stats.records_dropped, 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_reconnect_delay() {
    let connector = Arc::new(MockConnector::new());
    let (sinks, _telemetry, _persistence) = sinks(8);
    let config = config().reconnect_delay(Duration::from_secs(3600));

    let worker = DeviceWorker::spawn(config, connector.clone(), sinks);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let started = Instant::now();
    worker.stop().await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(worker.state(), WorkerState::Stopped);
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_connect_disconnects_the_new_link() {
    let link = MockLink::bluno();
    let connector = Arc::new(
        MockConnector::new()
            .then_link(&link)
            .connect_delay(Duration::from_secs(3)),
    );
    let (sinks, _telemetry, _persistence) = sinks(8);

    let worker = DeviceWorker::spawn(config(), connector.clone(), sinks);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(worker.state(), WorkerState::Connecting);

    worker.stop().await;

    assert_eq!(worker.state(), WorkerState::Stopped);
    assert_eq!(connector.attempts(), 1);
    assert_eq!(link.disconnects(), 1);
    assert_eq!(worker.stats().cleanups, 1);
    // Stopped before authenticating: nothing was written to the peripheral.
    assert!(link.writes().is_empty());
}

#[tokio::test]
async fn test_cccd_located_by_descriptor_scan() {
    let link = MockLink::bluno();
    let mut session = MockConnector::new()
        .then_link(&link)
        .connect("AA")
        .await
        .unwrap();
    let notify = session.characteristic(BLUNO_SERIAL).await.unwrap();
    assert_eq!(locate_cccd(session.as_mut(), notify.handle).await, MOCK_CCCD_HANDLE);
}

#[tokio::test]
async fn test_cccd_falls_back_to_next_handle() {
    let link = MockLink::new().with_characteristic(BLUNO_SERIAL, 0x0040, true);
    let mut session = MockConnector::new()
        .then_link(&link)
        .connect("AA")
        .await
        .unwrap();
    assert_eq!(locate_cccd(session.as_mut(), 0x0040).await, 0x0041);
}

#[tokio::test]
async fn test_indicate_fallback_when_notify_rejected() {
    let link = MockLink::bluno().reject_descriptor_value(&[1, 0]);
    let mut session = MockConnector::new()
        .then_link(&link)
        .connect("AA")
        .await
        .unwrap();
    assert_eq!(
        enable_notifications(session.as_mut(), MOCK_CCCD_HANDLE).await,
        Some([3, 0])
    );

    let both = MockLink::bluno()
        .reject_descriptor_value(&[1, 0])
        .reject_descriptor_value(&[3, 0]);
    let mut session = MockConnector::new()
        .then_link(&both)
        .connect("AA")
        .await
        .unwrap();
    assert_eq!(enable_notifications(session.as_mut(), MOCK_CCCD_HANDLE).await, None);
    assert_eq!(both.writes().len(), 2);
}
