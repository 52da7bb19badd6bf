//! Gateway heartbeat.
//!
//! Every interval the prober checks that the serial controller answers,
//! asks it for a radio report, and publishes a compact heartbeat:
//!
//! ```json
//! {"schema":"v1","gateway_id":"1","ts":1700000000000,
//!  "health":{"pid":4242,"uptime_ms":30000,
//!            "link":{"reachable":true,"sinr":"12","rsrp":"-95","type":"LTE","gci":"0x1A2B","tac":"0x0102"}}}
//! ```
//!
//! A failed publish doubles the next wait, capped at two minutes.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sensorgate_core::{SerialBridge, now_ms};

use crate::publisher::Topics;
use crate::task::ServiceTask;

/// Shortest heartbeat interval.
pub const MIN_INTERVAL: Duration = Duration::from_secs(5);

/// Longest wait after a failed heartbeat.
pub const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// Collection window for the controller's health report.
pub const REPORT_TIMEOUT: Duration = Duration::from_secs(15);

/// Heartbeat schema tag.
pub const SCHEMA: &str = "v1";

/// Serving-cell fields from a CPSI report line (`SINR,RSRP,type,GCI,TAC`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CellInfo {
    pub sinr: String,
    pub rsrp: String,
    #[serde(rename = "type")]
    pub system: String,
    pub gci: String,
    pub tac: String,
}

impl CellInfo {
    /// Parse one report line. Lines without a comma, JSON lines, and lines
    /// with fewer than five fields are not CPSI data.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('{') || !line.contains(',') {
            return None;
        }
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 5 {
            return None;
        }
        Some(Self {
            sinr: parts[0].to_string(),
            rsrp: parts[1].to_string(),
            system: parts[2].to_string(),
            gci: parts[3].to_string(),
            tac: parts[4].to_string(),
        })
    }

    /// First CPSI line of a multi-line report.
    pub fn from_report(report: &str) -> Option<Self> {
        report.lines().find_map(Self::parse_line)
    }
}

/// Build the heartbeat object.
pub fn heartbeat_payload(
    gateway_id: &str,
    ts_ms: i64,
    uptime: Duration,
    reachable: bool,
    cell: Option<&CellInfo>,
) -> Value {
    let mut link = Map::new();
    link.insert("reachable".to_string(), Value::from(reachable));
    if let Some(cell) = cell
        && let Ok(Value::Object(fields)) = serde_json::to_value(cell)
    {
        link.extend(fields);
    }
    json!({
        "schema": SCHEMA,
        "gateway_id": gateway_id,
        "ts": ts_ms,
        "health": {
            "pid": std::process::id(),
            "uptime_ms": u64::try_from(uptime.as_millis()).unwrap_or(u64::MAX),
            "link": link,
        },
    })
}

/// Wait before the next heartbeat.
pub fn next_delay(interval: Duration, published: bool) -> Duration {
    let interval = interval.max(MIN_INTERVAL);
    if published {
        interval
    } else {
        (interval * 2).min(MAX_BACKOFF)
    }
}

/// Running heartbeat loop.
#[derive(Debug)]
pub struct HealthProber {
    task: ServiceTask,
}

impl HealthProber {
    /// Spawn the loop; the first heartbeat goes out immediately.
    pub fn spawn(bridge: Arc<SerialBridge>, topics: Topics, interval: Duration) -> Self {
        let started = Instant::now();
        let task = ServiceTask::spawn("health", move |cancel| {
            run(bridge, topics, interval, started, cancel)
        });
        Self { task }
    }

    /// Stop the loop and wait for it.
    pub async fn stop(&self) {
        self.task.stop().await;
    }
}

/// Probe, collect and publish one heartbeat. Returns whether it was published.
pub async fn beat(bridge: &SerialBridge, topics: &Topics, uptime: Duration) -> bool {
    let reachable = bridge.probe().await;
    if !reachable {
        warn!("Serial controller did not answer the probe");
    }

    let ts = now_ms();
    let report = bridge.health(ts, REPORT_TIMEOUT).await;
    let cell = CellInfo::from_report(&report);
    match &cell {
        Some(cell) => debug!(
            "CPSI SINR:{} RSRP:{} type:{} GCI:{} TAC:{}",
            cell.sinr, cell.rsrp, cell.system, cell.gci, cell.tac
        ),
        None if report.trim().is_empty() => debug!("No health report"),
        None => debug!("Health report without CPSI data: {}", report),
    }

    let payload = heartbeat_payload(topics.gateway_id(), ts, uptime, reachable, cell.as_ref());
    bridge.publish(&topics.health(), &payload.to_string()).await
}

async fn run(
    bridge: Arc<SerialBridge>,
    topics: Topics,
    interval: Duration,
    started: Instant,
    cancel: CancellationToken,
) {
    info!("Health prober started (every {:?})", interval.max(MIN_INTERVAL));
    loop {
        let ok = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            ok = beat(&bridge, &topics, started.elapsed()) => ok,
        };
        if ok {
            info!("Heartbeat OK");
        } else {
            warn!("Heartbeat ERR");
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = sleep(next_delay(interval, ok)) => {}
        }
    }
}
