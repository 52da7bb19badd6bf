//! Device link worker: one long-lived task pair per configured peripheral.
//!
//! The link task connects, authenticates, enables notifications and pumps
//! them into a [`LineBuffer`]; complete lines go onto a drop-oldest
//! [`DropOldestQueue`]. A separate decode task turns lines into
//! [`DecodedRecord`]s and forwards clones to the telemetry and persistence
//! channels with `try_send`, so neither task ever blocks on a consumer.
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> NotifyEnabled -> Streaming
//!       ^                                                            |
//!       +----------------------- link error -------------------------+
//! ```
//!
//! Stop is observed from any state and routes through cleanup to
//! [`WorkerState::Stopped`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use sensorgate_types::DecodedRecord;
use sensorgate_types::uuids::{
    CCCD_INDICATE_NOTIFY, CCCD_NOTIFY, CCCD_SCAN_SPAN, CLIENT_CHARACTERISTIC_CONFIG,
};

use crate::decode::decode_line;
use crate::device_config::DeviceConfig;
use crate::error::{Error, Result};
use crate::line_buffer::LineBuffer;
use crate::link::{CharacteristicInfo, GattLink, LinkConnector};
use crate::metrics::{LinkMetrics, LinkStats};
use crate::queue::{DEFAULT_LINE_QUEUE_CAPACITY, DropOldestQueue};
use crate::util::now_ms;

/// Poll interval while streaming and while waiting on the line queue.
pub const NOTIFICATION_POLL: Duration = Duration::from_secs(1);

/// Pause after each best-effort command write.
pub const COMMAND_WRITE_PAUSE: Duration = Duration::from_millis(100);

/// A reassembled line and the time it was completed.
pub type CapturedLine = (i64, String);

/// Lifecycle state of a device worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting to (re)connect.
    Disconnected,
    /// Opening the link.
    Connecting,
    /// Resolving endpoints and writing auth/link-config strings.
    Authenticating,
    /// CCCD written, handler not yet installed.
    NotifyEnabled,
    /// Receiving notifications.
    Streaming,
    /// Stopped for good.
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Disconnected => "disconnected",
            WorkerState::Connecting => "connecting",
            WorkerState::Authenticating => "authenticating",
            WorkerState::NotifyEnabled => "notify-enabled",
            WorkerState::Streaming => "streaming",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Downstream channels fed by a worker's decode task.
#[derive(Debug, Clone)]
pub struct RecordSinks {
    /// Records bound for the publisher.
    pub telemetry: mpsc::Sender<DecodedRecord>,
    /// Records bound for the local store.
    pub persistence: mpsc::Sender<DecodedRecord>,
}

/// Handle to a running device worker.
///
/// Dropping the handle does not stop the worker; call [`DeviceWorker::stop`].
pub struct DeviceWorker {
    name: String,
    cancel: CancellationToken,
    state: watch::Receiver<WorkerState>,
    metrics: Arc<LinkMetrics>,
    tasks: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl fmt::Debug for DeviceWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceWorker")
            .field("name", &self.name)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl DeviceWorker {
    /// Spawn the link and decode tasks for `config`.
    pub fn spawn(
        config: DeviceConfig,
        connector: Arc<dyn LinkConnector>,
        sinks: RecordSinks,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(WorkerState::Disconnected);
        let metrics = Arc::new(LinkMetrics::new());
        let lines = DropOldestQueue::new(DEFAULT_LINE_QUEUE_CAPACITY);
        let config = Arc::new(config);

        info!(
            device = %config.name,
            address = %config.address,
            sensor_id = %config.sensor_id,
            mode = %config.decode_mode,
            "Starting device worker"
        );

        let span = info_span!("device", name = %config.name);

        let link_task = tokio::spawn(
            LinkTask {
                config: Arc::clone(&config),
                connector,
                lines: lines.clone(),
                state: state_tx,
                metrics: Arc::clone(&metrics),
                cancel: cancel.clone(),
            }
            .run()
            .instrument(span.clone()),
        );

        let decode_task = tokio::spawn(
            run_decoder(
                Arc::clone(&config),
                lines,
                sinks,
                Arc::clone(&metrics),
                cancel.clone(),
            )
            .instrument(span),
        );

        Self {
            name: config.name.clone(),
            cancel,
            state: state_rx,
            metrics,
            tasks: Mutex::new(Some((link_task, decode_task))),
        }
    }

    /// The configured device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> LinkStats {
        self.metrics.snapshot()
    }

    /// Stop the worker and wait for both tasks to finish.
    ///
    /// Safe to call more than once; later calls return once the first has
    /// completed.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let tasks = self.tasks.lock().await.take();
        if let Some((link, decode)) = tasks {
            for (which, handle) in [("link", link), ("decode", decode)] {
                if let Err(e) = handle.await {
                    warn!(device = %self.name, "{} task ended abnormally: {}", which, e);
                }
            }
            info!(device = %self.name, "Device worker stopped");
        }
    }
}

struct LinkTask {
    config: Arc<DeviceConfig>,
    connector: Arc<dyn LinkConnector>,
    lines: DropOldestQueue<CapturedLine>,
    state: watch::Sender<WorkerState>,
    metrics: Arc<LinkMetrics>,
    cancel: CancellationToken,
}

impl LinkTask {
    async fn run(self) {
        let mut slot: Option<Box<dyn GattLink>> = None;

        while !self.cancel.is_cancelled() {
            self.metrics.connect_attempt();
            match self.session(&mut slot).await {
                Ok(()) => debug!("Stop requested"),
                Err(e) => warn!(address = %self.config.address, "Link failed: {}", e),
            }
            self.cleanup(&mut slot).await;

            if self.cancel.is_cancelled() {
                break;
            }
            self.state.send_replace(WorkerState::Disconnected);
            info!("Reconnecting in {:?}", self.config.reconnect_delay);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }

        self.cleanup(&mut slot).await;
        self.state.send_replace(WorkerState::Stopped);
    }

    /// One connection's lifetime. Returns `Ok(())` only when stopped.
    ///
    /// Stop is checked once the connect attempt resolves and while
    /// streaming. A link that comes up is always parked in `slot` first, so
    /// cleanup can disconnect it.
    async fn session(&self, slot: &mut Option<Box<dyn GattLink>>) -> Result<()> {
        self.state.send_replace(WorkerState::Connecting);
        info!("Connecting to {}", self.config.address);
        let link = slot.insert(self.connector.connect(&self.config.address).await?);
        self.metrics.connected();
        info!("Connected");
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        self.state.send_replace(WorkerState::Authenticating);
        let notify = link.characteristic(self.config.notify_uuid).await?;
        if !notify.notify {
            return Err(Error::MissingNotify(notify.uuid.to_string()));
        }

        match link.characteristic(self.config.command_uuid).await {
            Ok(command) => {
                for (what, text) in [
                    ("auth", self.config.auth.as_deref()),
                    ("link config", self.config.link_config.as_deref()),
                ] {
                    if let Some(text) = text {
                        write_command(link.as_mut(), &command, what, text).await;
                    }
                }
            }
            Err(e) => warn!("Command endpoint unavailable, skipping auth and link config: {}", e),
        }

        let cccd = locate_cccd(link.as_mut(), notify.handle).await;
        enable_notifications(link.as_mut(), cccd).await;
        self.state.send_replace(WorkerState::NotifyEnabled);

        let mut buffer = LineBuffer::new();
        let lines = self.lines.clone();
        let metrics = Arc::clone(&self.metrics);
        link.set_notification_handler(Box::new(move |chunk: &[u8]| {
            for line in buffer.push(chunk) {
                let dropped = lines.push((now_ms(), line)).is_some();
                metrics.line(dropped);
                if dropped {
                    warn!("Line queue full, dropped oldest line");
                }
            }
        }))
        .await?;

        self.state.send_replace(WorkerState::Streaming);
        info!("Streaming notifications from {}", notify.uuid);

        while !self.cancel.is_cancelled() {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = link.wait_for_notifications(NOTIFICATION_POLL) => {
                    result?;
                }
            }
        }
        Ok(())
    }

    async fn cleanup(&self, slot: &mut Option<Box<dyn GattLink>>) {
        if let Some(mut link) = slot.take() {
            if let Err(e) = link.disconnect().await {
                debug!("Disconnect failed (ignored): {}", e);
            }
            self.metrics.cleanup();
        }
    }
}

async fn write_command(
    link: &mut dyn GattLink,
    command: &CharacteristicInfo,
    what: &str,
    text: &str,
) {
    let data = format!("{text}\r\n");
    match link.write_without_response(command, data.as_bytes()).await {
        Ok(()) => {
            tokio::time::sleep(COMMAND_WRITE_PAUSE).await;
            info!("Sent {}", what);
        }
        Err(e) => warn!("{} write failed (continuing): {}", what, e),
    }
}

/// Find the CCCD handle for a notify endpoint whose value handle is `handle`.
///
/// Scans `handle..=handle + 12` for descriptor 0x2902 and falls back to
/// `handle + 1` when the peripheral lists none.
pub async fn locate_cccd(link: &mut dyn GattLink, handle: u16) -> u16 {
    let end = handle.saturating_add(CCCD_SCAN_SPAN);
    match link.descriptors(handle, end).await {
        Ok(descriptors) => {
            if let Some(d) = descriptors
                .iter()
                .find(|d| d.uuid == CLIENT_CHARACTERISTIC_CONFIG)
            {
                return d.handle;
            }
        }
        Err(e) => debug!("Descriptor discovery failed: {}", e),
    }
    handle.saturating_add(1)
}

/// Write notify, then indicate+notify, to the CCCD. Never fails the connection.
///
/// Returns the value that was accepted, if any.
pub async fn enable_notifications(link: &mut dyn GattLink, cccd: u16) -> Option<[u8; 2]> {
    for value in [CCCD_NOTIFY, CCCD_INDICATE_NOTIFY] {
        match link.write_descriptor(cccd, &value).await {
            Ok(()) => {
                info!("Notifications enabled (cccd=0x{:04x}, value={:02x?})", cccd, value);
                return Some(value);
            }
            Err(e) => warn!("CCCD write 0x{:04x} value={:02x?} failed: {}", cccd, value, e),
        }
    }
    warn!("Could not enable notifications; continuing");
    None
}

async fn run_decoder(
    config: Arc<DeviceConfig>,
    lines: DropOldestQueue<CapturedLine>,
    sinks: RecordSinks,
    metrics: Arc<LinkMetrics>,
    cancel: CancellationToken,
) {
    while !cancel.is_cancelled() {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = lines.pop_timeout(NOTIFICATION_POLL) => next,
        };
        let Some((captured_at_ms, line)) = next else {
            continue;
        };

        match decode_line(&config, captured_at_ms, &line) {
            Ok(None) => debug!("{} RAW -> {}", config.sensor_id, line),
            Ok(Some(record)) => {
                metrics.record();
                debug!("{} -> {:?}", config.sensor_id, record.measurement);
                forward(&sinks.telemetry, record.clone(), "telemetry", &metrics);
                forward(&sinks.persistence, record, "persistence", &metrics);
            }
            Err(e) => {
                metrics.decode_error();
                error!("{} undecodable line ({}): {}", config.sensor_id, e, line);
            }
        }
    }
}

fn forward(
    sink: &mpsc::Sender<DecodedRecord>,
    record: DecodedRecord,
    queue: &str,
    metrics: &LinkMetrics,
) {
    match sink.try_send(record) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            metrics.record_dropped();
            warn!("{} queue full, record dropped", queue);
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            metrics.record_dropped();
            debug!("{} queue closed, record dropped", queue);
        }
    }
}
