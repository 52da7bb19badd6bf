//! Serial command bridge.
//!
//! A single worker task owns the [`SerialTransport`]. Callers on any task
//! submit requests through a bounded channel and wait on a private one-shot
//! reply, so requests run strictly one at a time in FIFO order and their
//! I/O never interleaves on the wire.
//!
//! Public operations never fail. When the queue is saturated or closed, the
//! caller's deadline passes, or both execution attempts fail, the caller gets
//! the command's degraded value (`false`, `None` or an empty string).
//!
//! # Example
//!
//! ```no_run
//! use sensorgate_core::{BridgeOptions, SerialBridge, SerialPortTransport};
//!
//! # async fn example() -> sensorgate_core::Result<()> {
//! let transport = SerialPortTransport::new("/dev/ttyACM0", 115_200);
//! let bridge = SerialBridge::open(Box::new(transport), BridgeOptions::default()).await?;
//! if bridge.probe().await {
//!     bridge.publish("fleet/1/amb/a01", r#"{"ts":1}"#).await;
//! }
//! bridge.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod protocol;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::{Error, Result};
use crate::metrics::{BridgeMetrics, BridgeStats};
use crate::transport::SerialTransport;

/// Default request queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default publish wait budget used for the caller deadline.
pub const DEFAULT_PUBLISH_BUDGET: Duration = Duration::from_secs(30);

/// Bridge timing and queue options.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Capacity of the request queue.
    pub queue_capacity: usize,
    /// Quiet period after each open before the first command.
    pub warmup: Duration,
    /// How long to discard banner output once the warm-up ends.
    pub drain: Duration,
    /// Minimum time between the last I/O and a publish.
    pub publish_gap: Duration,
    /// Minimum time between the last I/O and any other command.
    pub command_gap: Duration,
    /// Pause between closing and reopening the port on recovery.
    pub recovery_pause: Duration,
    /// Pause between recovery and the second attempt.
    pub retry_pause: Duration,
    /// How often the idle worker checks for shutdown.
    pub poll_interval: Duration,
    /// Added to every command's internal budget to form the caller deadline.
    pub caller_margin: Duration,
    /// Internal budget assumed for publishes.
    pub publish_budget: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            warmup: Duration::from_millis(1500),
            drain: Duration::from_millis(500),
            publish_gap: Duration::from_millis(500),
            command_gap: Duration::from_millis(200),
            recovery_pause: Duration::from_millis(300),
            retry_pause: Duration::from_millis(500),
            poll_interval: Duration::from_millis(500),
            caller_margin: Duration::from_secs(2),
            publish_budget: DEFAULT_PUBLISH_BUDGET,
        }
    }
}

impl BridgeOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request queue capacity.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the post-open warm-up.
    #[must_use]
    pub fn warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    /// Set the caller deadline margin.
    #[must_use]
    pub fn caller_margin(mut self, margin: Duration) -> Self {
        self.caller_margin = margin;
        self
    }

    /// Set the publish budget.
    #[must_use]
    pub fn publish_budget(mut self, budget: Duration) -> Self {
        self.publish_budget = budget;
        self
    }

    /// Deadline a caller waits for `command`'s reply.
    ///
    /// Covers a full warm-up and drain, the inter-command gap, both
    /// attempts with the recovery pauses between them, and the margin.
    fn caller_timeout(&self, command: &Command) -> Duration {
        let pauses = self.warmup + self.drain + command.gap(self) + self.recovery_pause + self.retry_pause;
        command.budget(self) * 2 + pauses + self.caller_margin
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::invalid_config("queue_capacity must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::invalid_config("poll_interval must be non-zero"));
        }
        if self.caller_margin.is_zero() {
            return Err(Error::invalid_config("caller_margin must be non-zero"));
        }
        Ok(())
    }
}

/// One queued command and its parameters.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Probe,
    Locate,
    Publish { topic: String, payload: String },
    At { command: String, timeout: Duration },
    Direct { command: String, timeout: Duration },
    Health { timestamp_ms: i64, timeout: Duration },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Probe => "probe",
            Command::Locate => "locate",
            Command::Publish { .. } => "publish",
            Command::At { .. } => "at",
            Command::Direct { .. } => "direct",
            Command::Health { .. } => "health",
        }
    }

    /// Longest the protocol itself may take once it starts.
    fn budget(&self, options: &BridgeOptions) -> Duration {
        match self {
            Command::Probe => protocol::PROBE_TIMEOUT,
            Command::Locate => protocol::LOCATE_TIMEOUT,
            Command::Publish { .. } => options.publish_budget,
            Command::At { timeout, .. } => (*timeout).max(protocol::AT_MIN_TIMEOUT),
            Command::Direct { timeout, .. } | Command::Health { timeout, .. } => {
                (*timeout).max(protocol::DIRECT_MIN_TIMEOUT)
            }
        }
    }

    fn gap(&self, options: &BridgeOptions) -> Duration {
        match self {
            Command::Publish { .. } => options.publish_gap,
            _ => options.command_gap,
        }
    }

    fn degraded(&self) -> Reply {
        match self {
            Command::Probe | Command::Publish { .. } => Reply::Flag(false),
            Command::Locate => Reply::Location(None),
            Command::At { .. } | Command::Direct { .. } | Command::Health { .. } => {
                Reply::Text(String::new())
            }
        }
    }

    async fn run(&self, transport: &mut dyn SerialTransport) -> Result<Reply> {
        Ok(match self {
            Command::Probe => Reply::Flag(protocol::probe(transport).await?),
            Command::Locate => Reply::Location(protocol::locate(transport).await?),
            Command::Publish { topic, payload } => {
                Reply::Flag(protocol::publish(transport, topic, payload).await?)
            }
            Command::At { command, timeout } => {
                Reply::Text(protocol::send_at(transport, command, *timeout).await?)
            }
            Command::Direct { command, timeout } => {
                Reply::Text(protocol::send_direct(transport, command, *timeout).await?)
            }
            Command::Health {
                timestamp_ms,
                timeout,
            } => Reply::Text(protocol::health(transport, *timestamp_ms, *timeout).await?),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Reply {
    Flag(bool),
    Location(Option<Value>),
    Text(String),
}

impl Reply {
    fn flag(self) -> bool {
        matches!(self, Reply::Flag(true))
    }

    fn location(self) -> Option<Value> {
        match self {
            Reply::Location(location) => location,
            _ => None,
        }
    }

    fn text(self) -> String {
        match self {
            Reply::Text(text) => text,
            _ => String::new(),
        }
    }
}

struct CommandRequest {
    command: Command,
    reply: oneshot::Sender<Reply>,
}

/// Handle to the serial command bridge.
///
/// Cheap to share behind an [`Arc`]; every method takes `&self`.
pub struct SerialBridge {
    requests: mpsc::Sender<CommandRequest>,
    cancel: CancellationToken,
    metrics: Arc<BridgeMetrics>,
    options: BridgeOptions,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for SerialBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialBridge")
            .field("options", &self.options)
            .field("stopped", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SerialBridge {
    /// Open `transport` and start the bridge worker.
    ///
    /// Fails only if the options are invalid or the first open fails.
    pub async fn open(mut transport: Box<dyn SerialTransport>, options: BridgeOptions) -> Result<Self> {
        options.validate()?;
        transport.open().await?;

        let (requests, rx) = mpsc::channel(options.queue_capacity);
        let cancel = CancellationToken::new();
        let metrics = Arc::new(BridgeMetrics::new());

        let worker = BridgeWorker {
            ready_at: Instant::now() + options.warmup,
            last_io: None,
            transport,
            requests: rx,
            cancel: cancel.clone(),
            metrics: Arc::clone(&metrics),
            options: options.clone(),
        };
        let handle = tokio::spawn(worker.run().instrument(info_span!("bridge")));
        info!("Serial bridge started");

        Ok(Self {
            requests,
            cancel,
            metrics,
            options,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Check that the controller answers `PONG`.
    pub async fn probe(&self) -> bool {
        self.request(Command::Probe).await.flag()
    }

    /// Ask the controller for its location object.
    pub async fn locate(&self) -> Option<Value> {
        self.request(Command::Locate).await.location()
    }

    /// Publish `payload` on `topic` through the uplink.
    pub async fn publish(&self, topic: &str, payload: &str) -> bool {
        self.request(Command::Publish {
            topic: topic.to_string(),
            payload: payload.to_string(),
        })
        .await
        .flag()
    }

    /// Run a modem AT command and return its output lines.
    pub async fn send_at(&self, command: &str, timeout: Duration) -> String {
        self.request(Command::At {
            command: command.to_string(),
            timeout,
        })
        .await
        .text()
    }

    /// Write `command` verbatim and return the reply lines.
    pub async fn send_direct(&self, command: &str, timeout: Duration) -> String {
        self.request(Command::Direct {
            command: command.to_string(),
            timeout,
        })
        .await
        .text()
    }

    /// Request a link health report for `timestamp_ms`.
    pub async fn health(&self, timestamp_ms: i64, timeout: Duration) -> String {
        self.request(Command::Health {
            timestamp_ms,
            timeout,
        })
        .await
        .text()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> BridgeStats {
        self.metrics.snapshot()
    }

    async fn request(&self, command: Command) -> Reply {
        let degraded = command.degraded();
        let name = command.name();
        let wait = self.options.caller_timeout(&command);
        let (reply, rx) = oneshot::channel();

        if let Err(e) = self.requests.try_send(CommandRequest { command, reply }) {
            self.metrics.rejected();
            match e {
                mpsc::error::TrySendError::Full(_) => warn!("Bridge queue full, {} rejected", name),
                mpsc::error::TrySendError::Closed(_) => debug!("Bridge stopped, {} rejected", name),
            }
            return degraded;
        }
        self.metrics.enqueued();

        match timeout(wait, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                debug!("{} dropped without reply", name);
                degraded
            }
            Err(_) => {
                warn!("{} timed out after {:?}", name, wait);
                degraded
            }
        }
    }

    /// Stop the worker and close the transport.
    ///
    /// A command whose I/O has started runs to completion first; queued
    /// requests get their degraded value. Safe to call more than once; the
    /// transport is closed exactly once.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Bridge worker ended abnormally: {}", e);
            }
            info!("Serial bridge closed");
        }
    }
}

struct BridgeWorker {
    transport: Box<dyn SerialTransport>,
    requests: mpsc::Receiver<CommandRequest>,
    cancel: CancellationToken,
    metrics: Arc<BridgeMetrics>,
    options: BridgeOptions,
    ready_at: Instant,
    last_io: Option<Instant>,
}

impl BridgeWorker {
    async fn run(mut self) {
        while !self.cancel.is_cancelled() {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = timeout(self.options.poll_interval, self.requests.recv()) => next,
            };
            let request = match next {
                Err(_) => continue,
                Ok(None) => break,
                Ok(Some(request)) => request,
            };

            // Waiting is interruptible; once the first byte goes out the
            // command runs to completion.
            if !self.wait_until_ready(&request.command).await {
                debug!("{} abandoned before any I/O", request.command.name());
                break;
            }
            let reply = self.execute(&request.command).await;
            if request.reply.send(reply).is_err() {
                debug!("{} caller gave up before the reply", request.command.name());
            }
            self.last_io = Some(Instant::now());
        }

        self.requests.close();
        if let Err(e) = self.transport.close().await {
            warn!("Closing serial transport failed: {}", e);
        }
        debug!("Bridge worker exiting");
    }

    /// Wait out the warm-up (then drain) and the inter-command gap.
    ///
    /// Returns `false` if shutdown was requested while waiting.
    async fn wait_until_ready(&mut self, command: &Command) -> bool {
        let cancel = self.cancel.clone();
        if Instant::now() < self.ready_at {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = sleep_until(self.ready_at) => {}
            }
            let deadline = Instant::now() + self.options.drain;
            protocol::drain(self.transport.as_mut(), deadline).await;
        }

        if let Some(until) = self.last_io.map(|last| last + command.gap(&self.options)) {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = sleep_until(until) => {}
            }
        }
        !cancel.is_cancelled()
    }

    async fn execute(&mut self, command: &Command) -> Reply {
        for attempt in 1..=2u8 {
            match command.run(self.transport.as_mut()).await {
                Ok(reply) => {
                    self.metrics.completed();
                    return reply;
                }
                Err(e) => {
                    warn!("{} failed (attempt {}/2): {}", command.name(), attempt, e);
                    if attempt == 1 {
                        self.recover().await;
                        sleep(self.options.retry_pause).await;
                    }
                }
            }
        }
        self.metrics.degraded();
        command.degraded()
    }

    async fn recover(&mut self) {
        warn!("Recovering serial port");
        self.metrics.recovery();
        if let Err(e) = self.transport.close().await {
            debug!("Close during recovery failed: {}", e);
        }
        sleep(self.options.recovery_pause).await;
        match self.transport.open().await {
            Ok(()) => self.ready_at = Instant::now() + self.options.warmup,
            Err(e) => error!("Reopening serial port failed: {}", e),
        }
    }
}
