//! Mock link and transport implementations for testing.
//!
//! These mocks let the device worker and the serial bridge run without BLE
//! hardware or a serial device:
//!
//! - [`MockLink`] / [`MockConnector`] implement [`GattLink`] and
//!   [`LinkConnector`] with scripted characteristics, descriptors,
//!   notification chunks and write failures.
//! - [`MockSerial`] implements [`SerialTransport`] with scripted replies,
//!   fault injection and a full I/O trace.
//!
//! All mocks are cheap to clone; clones share state, so a test keeps one
//! handle for assertions and hands another to the code under test.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use sensorgate_types::uuids::{BLUNO_COMMAND, BLUNO_SERIAL, CLIENT_CHARACTERISTIC_CONFIG};

use crate::error::{Error, Result};
use crate::link::{
    CharacteristicInfo, DescriptorInfo, GattLink, LinkConnector, NotificationHandler,
};
use crate::transport::SerialTransport;

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// --- BLE ---

/// A write performed on a [`MockLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkWrite {
    /// Write-without-response to a characteristic.
    Characteristic {
        /// Target characteristic.
        uuid: Uuid,
        /// Bytes written.
        data: Vec<u8>,
    },
    /// Descriptor write.
    Descriptor {
        /// Target handle.
        handle: u16,
        /// Value written.
        value: Vec<u8>,
    },
}

#[derive(Debug)]
enum LinkEvent {
    Chunk(Vec<u8>),
    Drop,
}

#[derive(Default)]
struct LinkState {
    characteristics: Vec<CharacteristicInfo>,
    descriptors: Vec<DescriptorInfo>,
    events: VecDeque<LinkEvent>,
    writes: Vec<LinkWrite>,
    rejected_descriptor_values: Vec<Vec<u8>>,
    fail_characteristic_writes: bool,
    handler_installed: bool,
    disconnects: u32,
}

/// A scripted GATT link.
///
/// # Example
///
/// ```
/// use sensorgate_core::mock::MockLink;
///
/// let link = MockLink::bluno();
/// link.push_chunk(b"{\"gas\":1,");
/// link.push_chunk(b"\"temp\":2,\"hum\":3,\"pres\":4}\n");
/// assert_eq!(link.disconnects(), 0);
/// ```
#[derive(Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<LinkState>>,
}

impl std::fmt::Debug for MockLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = guard(&self.state);
        f.debug_struct("MockLink")
            .field("characteristics", &state.characteristics.len())
            .field("pending_events", &state.events.len())
            .field("disconnects", &state.disconnects)
            .finish()
    }
}

/// Value handle of the notify endpoint in [`MockLink::bluno`].
pub const MOCK_NOTIFY_HANDLE: u16 = 0x0025;

/// Handle of the CCCD in [`MockLink::bluno`].
pub const MOCK_CCCD_HANDLE: u16 = 0x0027;

/// Value handle of the command endpoint in [`MockLink::bluno`].
pub const MOCK_COMMAND_HANDLE: u16 = 0x0029;

impl MockLink {
    /// An empty link with no characteristics.
    pub fn new() -> Self {
        Self::default()
    }

    /// A link shaped like a Bluno board: notify endpoint with a CCCD two
    /// handles above it, and a command endpoint.
    pub fn bluno() -> Self {
        Self::new()
            .with_characteristic(BLUNO_SERIAL, MOCK_NOTIFY_HANDLE, true)
            .with_descriptor(0x0026, Uuid::from_u128(0x0000_2901_0000_1000_8000_0080_5f9b_34fb))
            .with_descriptor(MOCK_CCCD_HANDLE, CLIENT_CHARACTERISTIC_CONFIG)
            .with_characteristic(BLUNO_COMMAND, MOCK_COMMAND_HANDLE, false)
    }

    /// Add a characteristic.
    #[must_use]
    pub fn with_characteristic(self, uuid: Uuid, handle: u16, notify: bool) -> Self {
        guard(&self.state).characteristics.push(CharacteristicInfo {
            uuid,
            handle,
            notify,
        });
        self
    }

    /// Add a descriptor.
    #[must_use]
    pub fn with_descriptor(self, handle: u16, uuid: Uuid) -> Self {
        guard(&self.state)
            .descriptors
            .push(DescriptorInfo { handle, uuid });
        self
    }

    /// Reject descriptor writes of `value`.
    #[must_use]
    pub fn reject_descriptor_value(self, value: &[u8]) -> Self {
        guard(&self.state)
            .rejected_descriptor_values
            .push(value.to_vec());
        self
    }

    /// Fail every characteristic write.
    #[must_use]
    pub fn fail_characteristic_writes(self) -> Self {
        guard(&self.state).fail_characteristic_writes = true;
        self
    }

    /// Queue a notification chunk.
    pub fn push_chunk(&self, chunk: &[u8]) {
        guard(&self.state)
            .events
            .push_back(LinkEvent::Chunk(chunk.to_vec()));
    }

    /// Queue a link loss, reported by the next notification wait.
    pub fn push_drop(&self) {
        guard(&self.state).events.push_back(LinkEvent::Drop);
    }

    /// All writes performed so far.
    pub fn writes(&self) -> Vec<LinkWrite> {
        guard(&self.state).writes.clone()
    }

    /// Number of `disconnect` calls.
    pub fn disconnects(&self) -> u32 {
        guard(&self.state).disconnects
    }

    /// Whether a notification handler is installed.
    pub fn handler_installed(&self) -> bool {
        guard(&self.state).handler_installed
    }
}

/// Per-connection view of a [`MockLink`] holding the installed handler.
struct MockLinkSession {
    link: MockLink,
    handler: Option<NotificationHandler>,
}

#[async_trait]
impl GattLink for MockLinkSession {
    async fn characteristic(&mut self, uuid: Uuid) -> Result<CharacteristicInfo> {
        let state = guard(&self.link.state);
        state
            .characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .copied()
            .ok_or_else(|| Error::characteristic_not_found(uuid.to_string(), state.characteristics.len()))
    }

    async fn descriptors(&mut self, start: u16, end: u16) -> Result<Vec<DescriptorInfo>> {
        Ok(guard(&self.link.state)
            .descriptors
            .iter()
            .filter(|d| (start..=end).contains(&d.handle))
            .copied()
            .collect())
    }

    async fn write_without_response(
        &mut self,
        characteristic: &CharacteristicInfo,
        data: &[u8],
    ) -> Result<()> {
        let mut state = guard(&self.link.state);
        if state.fail_characteristic_writes {
            return Err(Error::write_failed(characteristic.uuid.to_string(), "mock failure"));
        }
        state.writes.push(LinkWrite::Characteristic {
            uuid: characteristic.uuid,
            data: data.to_vec(),
        });
        Ok(())
    }

    async fn write_descriptor(&mut self, handle: u16, value: &[u8]) -> Result<()> {
        let mut state = guard(&self.link.state);
        state.writes.push(LinkWrite::Descriptor {
            handle,
            value: value.to_vec(),
        });
        if state.rejected_descriptor_values.iter().any(|v| v == value) {
            return Err(Error::write_failed(format!("handle 0x{handle:04x}"), "rejected"));
        }
        Ok(())
    }

    async fn set_notification_handler(&mut self, handler: NotificationHandler) -> Result<()> {
        self.handler = Some(handler);
        guard(&self.link.state).handler_installed = true;
        Ok(())
    }

    async fn wait_for_notifications(&mut self, timeout: Duration) -> Result<bool> {
        let event = guard(&self.link.state).events.pop_front();
        match event {
            Some(LinkEvent::Chunk(chunk)) => {
                if let Some(handler) = self.handler.as_mut() {
                    handler(&chunk);
                }
                Ok(true)
            }
            Some(LinkEvent::Drop) => Err(Error::NotConnected),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(false)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.handler = None;
        let mut state = guard(&self.link.state);
        state.disconnects += 1;
        state.handler_installed = false;
        Ok(())
    }
}

/// A scripted [`LinkConnector`].
///
/// Connection outcomes are consumed in order; once the script is exhausted
/// every attempt fails with [`Error::DeviceNotFound`].
#[derive(Debug, Default)]
pub struct MockConnector {
    outcomes: Mutex<VecDeque<Option<MockLink>>>,
    attempts: AtomicU32,
    connect_delay: Duration,
}

impl MockConnector {
    /// A connector with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a successful connection to `link`.
    #[must_use]
    pub fn then_link(self, link: &MockLink) -> Self {
        guard(&self.outcomes).push_back(Some(link.clone()));
        self
    }

    /// Script a failed connection attempt.
    #[must_use]
    pub fn then_fail(self) -> Self {
        guard(&self.outcomes).push_back(None);
        self
    }

    /// Make every connection attempt take `delay` before resolving.
    #[must_use]
    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Number of connection attempts made.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkConnector for MockConnector {
    async fn connect(&self, address: &str) -> Result<Box<dyn GattLink>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        let outcome = guard(&self.outcomes).pop_front().flatten();
        match outcome {
            Some(link) => Ok(Box::new(MockLinkSession {
                link,
                handler: None,
            })),
            None => Err(Error::device_not_found(address)),
        }
    }
}

// --- Serial ---

/// An event in a [`MockSerial`] trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialEvent {
    /// Port opened.
    Opened,
    /// Port closed.
    Closed,
    /// Line written (without CRLF).
    Wrote(String),
    /// Line read.
    Read(String),
}

struct Rule {
    trigger: String,
    replies: Vec<(Duration, String)>,
}

#[derive(Default)]
struct SerialState {
    open: bool,
    opens: u32,
    closes: u32,
    trace: Vec<SerialEvent>,
    rules: Vec<Rule>,
    banner: Vec<String>,
    inbox: VecDeque<(Instant, String)>,
    write_faults: u32,
    open_faults: u32,
}

/// A scripted serial peer.
///
/// Replies are registered per written line and become readable after
/// their delay, measured from the write on the tokio clock, so tests can
/// run with paused time.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use sensorgate_core::mock::MockSerial;
///
/// let serial = MockSerial::new()
///     .reply("<<<PING>>>", "PONG")
///     .reply_after("<<<GPS?>>>", Duration::from_millis(300), r#"{"lat":1,"lon":2}"#);
/// assert_eq!(serial.closes(), 0);
/// ```
#[derive(Clone, Default)]
pub struct MockSerial {
    state: Arc<Mutex<SerialState>>,
}

impl std::fmt::Debug for MockSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = guard(&self.state);
        f.debug_struct("MockSerial")
            .field("open", &state.open)
            .field("opens", &state.opens)
            .field("closes", &state.closes)
            .finish()
    }
}

impl MockSerial {
    /// A closed mock with no scripted replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `line` immediately whenever `trigger` is written.
    #[must_use]
    pub fn reply(self, trigger: &str, line: &str) -> Self {
        self.reply_after(trigger, Duration::ZERO, line)
    }

    /// Reply with `line` `delay` after `trigger` is written.
    #[must_use]
    pub fn reply_after(self, trigger: &str, delay: Duration, line: &str) -> Self {
        {
            let mut state = guard(&self.state);
            match state.rules.iter_mut().find(|r| r.trigger == trigger) {
                Some(rule) => rule.replies.push((delay, line.to_string())),
                None => state.rules.push(Rule {
                    trigger: trigger.to_string(),
                    replies: vec![(delay, line.to_string())],
                }),
            }
        }
        self
    }

    /// Lines emitted every time the port is opened.
    #[must_use]
    pub fn banner(self, lines: &[&str]) -> Self {
        guard(&self.state).banner = lines.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Make the next `n` writes fail with an I/O error.
    pub fn fail_next_writes(&self, n: u32) {
        guard(&self.state).write_faults = n;
    }

    /// Make the next `n` opens fail.
    pub fn fail_next_opens(&self, n: u32) {
        guard(&self.state).open_faults = n;
    }

    /// Make `line` readable now.
    pub fn push_line(&self, line: &str) {
        guard(&self.state)
            .inbox
            .push_back((Instant::now(), line.to_string()));
    }

    /// Full I/O trace.
    pub fn trace(&self) -> Vec<SerialEvent> {
        guard(&self.state).trace.clone()
    }

    /// Lines written so far, in order.
    pub fn written(&self) -> Vec<String> {
        guard(&self.state)
            .trace
            .iter()
            .filter_map(|e| match e {
                SerialEvent::Wrote(line) => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of successful opens.
    pub fn opens(&self) -> u32 {
        guard(&self.state).opens
    }

    /// Number of close calls.
    pub fn closes(&self) -> u32 {
        guard(&self.state).closes
    }
}

#[async_trait]
impl SerialTransport for MockSerial {
    async fn open(&mut self) -> Result<()> {
        let mut state = guard(&self.state);
        if state.open_faults > 0 {
            state.open_faults -= 1;
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "mock port unavailable",
            )));
        }
        state.open = true;
        state.opens += 1;
        state.inbox.clear();
        state.trace.push(SerialEvent::Opened);
        let now = Instant::now();
        let banner: Vec<_> = state.banner.iter().map(|l| (now, l.clone())).collect();
        state.inbox.extend(banner);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = guard(&self.state);
        state.closes += 1;
        if state.open {
            state.open = false;
            state.trace.push(SerialEvent::Closed);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        guard(&self.state).open
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut state = guard(&self.state);
        if !state.open {
            return Err(Error::NotConnected);
        }
        if state.write_faults > 0 {
            state.write_faults -= 1;
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock write fault",
            )));
        }
        state.trace.push(SerialEvent::Wrote(line.to_string()));
        let now = Instant::now();
        let replies: Vec<_> = state
            .rules
            .iter()
            .filter(|r| r.trigger == line)
            .flat_map(|r| r.replies.iter().map(|(d, l)| (now + *d, l.clone())))
            .collect();
        for reply in replies {
            let pos = state
                .inbox
                .iter()
                .position(|(at, _)| *at > reply.0)
                .unwrap_or(state.inbox.len());
            state.inbox.insert(pos, reply);
        }
        Ok(())
    }

    async fn read_line(&mut self, deadline: Instant) -> Result<Option<String>> {
        loop {
            let wake = {
                let mut state = guard(&self.state);
                if !state.open {
                    return Err(Error::NotConnected);
                }
                let now = Instant::now();
                let next_at = state.inbox.front().map(|(at, _)| *at);
                match next_at {
                    Some(at) if at <= now => {
                        if let Some((_, line)) = state.inbox.pop_front() {
                            state.trace.push(SerialEvent::Read(line.clone()));
                            return Ok(Some(line));
                        }
                        deadline
                    }
                    Some(at) => at.min(deadline),
                    None => deadline,
                }
            };
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep_until(wake).await;
        }
    }
}
