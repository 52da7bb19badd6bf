//! Line-oriented serial transport.
//!
//! [`SerialTransport`] is the only seam between the command bridge and the
//! physical port: open/close, CRLF-terminated writes, and line reads
//! bounded by an absolute deadline. [`SerialPortTransport`] implements it
//! over the `serialport` crate; [`crate::mock::MockSerial`] implements it
//! for tests.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use serialport::{ClearBuffer, SerialPort};
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Per-read timeout of the underlying port; bounds how far a read may
/// overshoot its deadline.
const PORT_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Write timeout of the underlying port.
const PORT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Settle delay after opening before input/output buffers are cleared.
const OPEN_SETTLE: Duration = Duration::from_millis(150);

/// A half-duplex, line-oriented serial link.
#[async_trait]
pub trait SerialTransport: Send {
    /// Open (or reopen) the port.
    async fn open(&mut self) -> Result<()>;

    /// Close the port. Closing a closed port is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// Whether the port is currently open.
    fn is_open(&self) -> bool;

    /// Write `line` followed by CRLF and flush.
    async fn write_line(&mut self, line: &str) -> Result<()>;

    /// Read one `\n`-terminated line before `deadline`.
    ///
    /// Returns `Ok(None)` at the deadline; partial input stays buffered for
    /// the next call. A trailing `\r` is removed.
    async fn read_line(&mut self, deadline: Instant) -> Result<Option<String>>;
}

/// Take one complete line out of `buf`, stripping `\n` and a trailing `\r`.
pub(crate) fn take_line(buf: &mut BytesMut) -> Option<String> {
    let nl = buf.iter().position(|&b| b == b'\n')?;
    let raw = buf.split_to(nl);
    buf.advance(1);
    let text = String::from_utf8_lossy(&raw);
    Some(text.trim_end_matches('\r').to_string())
}

type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;

/// [`SerialTransport`] over a real serial device.
///
/// DTR and RTS are held low on open so boards that reset on DTR keep
/// running. Blocking port I/O runs on the blocking thread pool.
pub struct SerialPortTransport {
    path: String,
    baud: u32,
    port: Option<SharedPort>,
    pending: BytesMut,
}

impl std::fmt::Debug for SerialPortTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPortTransport")
            .field("path", &self.path)
            .field("baud", &self.baud)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl SerialPortTransport {
    /// Create a closed transport for `path` at `baud`.
    pub fn new(path: impl Into<String>, baud: u32) -> Self {
        Self {
            path: path.into(),
            baud,
            port: None,
            pending: BytesMut::with_capacity(256),
        }
    }

    /// The device path.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn shared(&self) -> Result<SharedPort> {
        self.port.clone().ok_or(Error::NotConnected)
    }
}

fn lock(port: &SharedPort) -> std::sync::MutexGuard<'_, Box<dyn SerialPort>> {
    port.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

#[async_trait]
impl SerialTransport for SerialPortTransport {
    async fn open(&mut self) -> Result<()> {
        self.port = None;
        self.pending.clear();
        debug!("Opening serial port {} @ {}", self.path, self.baud);

        let path = self.path.clone();
        let baud = self.baud;
        let port = blocking(move || {
            let mut builder = serialport::new(&path, baud)
                .timeout(PORT_READ_TIMEOUT)
                .flow_control(serialport::FlowControl::None);
            #[cfg(unix)]
            {
                builder = builder
                    .data_bits(serialport::DataBits::Eight)
                    .stop_bits(serialport::StopBits::One)
                    .parity(serialport::Parity::None);
            }
            let mut port = builder.open()?;
            // Avoid resetting boards that reboot on DTR
            let _ = port.write_data_terminal_ready(false);
            let _ = port.write_request_to_send(false);
            Ok(port)
        })
        .await?;

        sleep(OPEN_SETTLE).await;
        let port: SharedPort = Arc::new(Mutex::new(port));
        {
            let guard = lock(&port);
            let _ = guard.clear(ClearBuffer::All);
        }
        self.port = Some(port);
        info!("Serial port {} open", self.path);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            self.pending.clear();
            info!("Serial port {} closed", self.path);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let port = self.shared()?;
        debug!("SER => {:?}", line);
        let data = format!("{line}\r\n").into_bytes();
        blocking(move || {
            let mut guard = lock(&port);
            let _ = guard.set_timeout(PORT_WRITE_TIMEOUT);
            let written = guard.write_all(&data).and_then(|()| guard.flush());
            let _ = guard.set_timeout(PORT_READ_TIMEOUT);
            written.map_err(Error::from)
        })
        .await
    }

    async fn read_line(&mut self, deadline: Instant) -> Result<Option<String>> {
        loop {
            if let Some(line) = take_line(&mut self.pending) {
                debug!("SER <= {:?}", line);
                return Ok(Some(line));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }

            let port = self.shared()?;
            let chunk = blocking(move || {
                let mut buf = [0u8; 256];
                match lock(&port).read(&mut buf) {
                    Ok(n) => Ok(buf[..n].to_vec()),
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
                    Err(e) => Err(Error::from(e)),
                }
            })
            .await?;

            if chunk.is_empty() {
                // Some drivers return immediately with nothing; don't spin.
                sleep(Duration::from_millis(10)).await;
            } else {
                self.pending.extend_from_slice(&chunk);
            }
        }
    }
}
