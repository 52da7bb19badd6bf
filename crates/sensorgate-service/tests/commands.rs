//! Diagnostics against a scripted serial controller.

use std::time::Duration;

use sensorgate_core::BridgeOptions;
use sensorgate_core::bridge::protocol::{AT_ENTRY, DIAG, END, GPS_QUERY, HEALTH_TS, PING, TOPIC};
use sensorgate_core::mock::MockSerial;
use sensorgate_service::commands::run_with;
use sensorgate_service::{Diagnostic, GatewayError};

async fn run(serial: &MockSerial, diagnostic: Diagnostic) -> sensorgate_service::Report {
    run_with(Box::new(serial.clone()), BridgeOptions::default(), &diagnostic)
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_ping() {
    let serial = MockSerial::new().reply(PING, "PONG");
    let report = run(&serial, Diagnostic::Ping).await;
    assert!(report.ok);
    assert_eq!(report.text, "PONG");
    assert_eq!(serial.closes(), 1);

    let silent = MockSerial::new();
    let report = run(&silent, Diagnostic::Ping).await;
    assert!(!report.ok);
}

#[tokio::test(start_paused = true)]
async fn test_at_collects_reply_lines() {
    let serial = MockSerial::new()
        .reply(AT_ENTRY, "AT>")
        .reply_after("AT+CSQ", Duration::from_millis(100), "+CSQ: 20,99")
        .reply_after("AT+CSQ", Duration::from_millis(150), "OK");
    let report = run(&serial, Diagnostic::At("AT+CSQ".to_string())).await;

    assert!(report.ok);
    assert_eq!(report.text, "+CSQ: 20,99\nOK");
    assert_eq!(serial.written(), vec![AT_ENTRY, "AT+CSQ"]);
}

#[tokio::test(start_paused = true)]
async fn test_gps() {
    let serial = MockSerial::new().reply_after(
        GPS_QUERY,
        Duration::from_millis(300),
        r#"{"lat":42.81,"lon":-1.64}"#,
    );
    let report = run(&serial, Diagnostic::Gps).await;
    assert!(report.ok);
    let location: serde_json::Value = serde_json::from_str(&report.text).unwrap();
    assert_eq!(location["lat"], 42.81);

    let report = run(&MockSerial::new(), Diagnostic::Gps).await;
    assert!(!report.ok);
}

#[tokio::test(start_paused = true)]
async fn test_publish() {
    let serial = MockSerial::new();
    let report = run(
        &serial,
        Diagnostic::Publish {
            topic: "fleet/1/test".to_string(),
            payload: r#"{"ping":"ok"}"#.to_string(),
        },
    )
    .await;

    assert!(report.ok);
    assert_eq!(report.text, "OK -> fleet/1/test");
    let written = serial.written();
    assert_eq!(written.first().map(String::as_str), Some(TOPIC));
    assert_eq!(written.last().map(String::as_str), Some(END));
}

#[tokio::test(start_paused = true)]
async fn test_health_parses_cpsi() {
    let serial = MockSerial::new()
        .reply_after(HEALTH_TS, Duration::from_millis(100), "12,-95,LTE,0x1A2B,0x0102");
    let report = run(&serial, Diagnostic::Health).await;

    assert!(report.ok);
    assert!(report.text.starts_with("12,-95,LTE,0x1A2B,0x0102"));
    assert!(report.text.contains("CPSI SINR:12 RSRP:-95 type:LTE GCI:0x1A2B TAC:0x0102"));
}

#[tokio::test(start_paused = true)]
async fn test_diag_sends_direct_token() {
    let serial = MockSerial::new()
        .reply_after(DIAG, Duration::from_millis(200), "=== SIM7070 ===")
        .reply_after(DIAG, Duration::from_millis(250), "CPIN: READY");
    let report = run(&serial, Diagnostic::Diag).await;

    assert!(report.ok);
    assert_eq!(report.text, "=== SIM7070 ===\nCPIN: READY");
    assert_eq!(serial.written(), vec![DIAG]);
}

#[tokio::test(start_paused = true)]
async fn test_open_failure() {
    let serial = MockSerial::new();
    serial.fail_next_opens(1);
    let err = run_with(Box::new(serial), BridgeOptions::default(), &Diagnostic::Ping)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Bridge(_)));
}
