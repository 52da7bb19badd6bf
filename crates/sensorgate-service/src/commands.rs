//! One-shot diagnostics against the serial controller.
//!
//! Each command opens its own bridge, runs a single request and closes
//! the port again, so they can be used while the gateway is stopped.

use std::fmt;
use std::time::Duration;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::info;

use sensorgate_core::bridge::protocol::DIAG;
use sensorgate_core::{BridgeOptions, SerialBridge, SerialPortTransport, SerialTransport, now_ms};

use crate::config::{Config, ConfigError};
use crate::gateway::GatewayError;
use crate::health::CellInfo;

/// Output window for `at`.
pub const AT_TIMEOUT: Duration = Duration::from_secs(5);

/// Output window for `health`.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(15);

/// Output window for `diag`; the dump is long.
pub const DIAG_TIMEOUT: Duration = Duration::from_secs(30);

/// A diagnostic request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Check the controller answers `PONG`.
    Ping,
    /// Run a modem AT command.
    At(String),
    /// Ask for the current location.
    Gps,
    /// Publish a payload through the uplink.
    Publish { topic: String, payload: String },
    /// Request a timestamped radio health report.
    Health,
    /// Dump the controller's full diagnostic report.
    Diag,
}

impl Diagnostic {
    /// Command name as used on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Diagnostic::Ping => "ping",
            Diagnostic::At(_) => "at",
            Diagnostic::Gps => "gps",
            Diagnostic::Publish { .. } => "pub",
            Diagnostic::Health => "health",
            Diagnostic::Diag => "diag",
        }
    }
}

/// Result of a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Whether the controller gave a usable answer.
    pub ok: bool,
    /// Human-readable output.
    pub text: String,
}

impl Report {
    fn new(ok: bool, text: impl Into<String>) -> Self {
        Self {
            ok,
            text: text.into(),
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Run `diagnostic` on an open bridge.
pub async fn run_on(bridge: &SerialBridge, diagnostic: &Diagnostic) -> Report {
    match diagnostic {
        Diagnostic::Ping => {
            if bridge.probe().await {
                Report::new(true, "PONG")
            } else {
                Report::new(false, "no answer")
            }
        }
        Diagnostic::At(command) => {
            let output = bridge.send_at(command, AT_TIMEOUT).await;
            Report::new(!output.trim().is_empty(), output)
        }
        Diagnostic::Gps => match bridge.locate().await {
            Some(location) => Report::new(true, location.to_string()),
            None => Report::new(false, "no location"),
        },
        Diagnostic::Publish { topic, payload } => {
            let ok = bridge.publish(topic, payload).await;
            Report::new(ok, format!("{} -> {}", if ok { "OK" } else { "ERR" }, topic))
        }
        Diagnostic::Health => {
            let ts = now_ms();
            info!("Sending health command with timestamp {} ({})", ts, format_ts(ts));
            let report = bridge.health(ts, HEALTH_TIMEOUT).await;
            if report.trim().is_empty() {
                return Report::new(false, "no health report");
            }
            let mut text = report.clone();
            if let Some(cell) = CellInfo::from_report(&report) {
                text.push_str(&format!(
                    "\nCPSI SINR:{} RSRP:{} type:{} GCI:{} TAC:{}",
                    cell.sinr, cell.rsrp, cell.system, cell.gci, cell.tac
                ));
            }
            Report::new(true, text)
        }
        Diagnostic::Diag => {
            let output = bridge.send_direct(DIAG, DIAG_TIMEOUT).await;
            Report::new(!output.trim().is_empty(), output)
        }
    }
}

/// Open a bridge on `transport`, run `diagnostic`, and close the bridge.
pub async fn run_with(
    transport: Box<dyn SerialTransport>,
    options: BridgeOptions,
    diagnostic: &Diagnostic,
) -> Result<Report, GatewayError> {
    let bridge = SerialBridge::open(transport, options).await?;
    let report = run_on(&bridge, diagnostic).await;
    bridge.shutdown().await;
    Ok(report)
}

/// Run `diagnostic` on the configured serial port.
pub async fn execute(config: &Config, diagnostic: &Diagnostic) -> Result<Report, GatewayError> {
    let errors = config.gateway.validate();
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors).into());
    }
    info!(
        "Running {} on {} @ {}",
        diagnostic.name(),
        config.gateway.serial_port,
        config.gateway.serial_baud
    );
    let transport = SerialPortTransport::new(
        config.gateway.serial_port.clone(),
        config.gateway.serial_baud,
    );
    run_with(Box::new(transport), BridgeOptions::default(), diagnostic).await
}

fn format_ts(ts_ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ts_ms) * 1_000_000)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| ts_ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(Diagnostic::At("AT".into()).name(), "at");
        assert_eq!(
            Diagnostic::Publish {
                topic: "t".into(),
                payload: "p".into()
            }
            .name(),
            "pub"
        );
    }

    #[test]
    fn test_format_ts() {
        assert_eq!(format_ts(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_ts(1_700_000_000_000), "2023-11-14T22:13:20Z");
    }
}
