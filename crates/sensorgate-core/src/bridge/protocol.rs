//! Line protocols spoken to the radio controller, one function per command.
//!
//! Every function runs to completion on an open transport and only returns
//! an error for transport I/O failures. A missing reply is not an error: it
//! yields `false`, `None` or an empty string.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::error::Result;
use crate::transport::SerialTransport;

/// Liveness probe; the controller answers `PONG`.
pub const PING: &str = "<<<PING>>>";
/// Location query; the controller answers a JSON object.
pub const GPS_QUERY: &str = "<<<GPS?>>>";
/// Starts an uplink publish; followed by the topic line.
pub const TOPIC: &str = "<<<TOPIC>>>";
/// Precedes the payload line of a publish.
pub const PAYLOAD: &str = "<<<PAYLOAD>>>";
/// Ends a publish.
pub const END: &str = "<<<END>>>";
/// Enters modem AT passthrough for one command.
pub const AT_ENTRY: &str = "<<<AT>>>";
/// Health request; followed by a millisecond timestamp line.
pub const HEALTH_TS: &str = "<<<HEALTH_TS>>>";
/// Diagnostic dump, sent as a direct command.
pub const DIAG: &str = "<<<DIAG>>>";

/// How long a probe waits for `PONG`.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// How long a location query reads.
pub const LOCATE_TIMEOUT: Duration = Duration::from_secs(4);
/// How long the AT entry waits for a prompt line.
pub const AT_PROMPT_TIMEOUT: Duration = Duration::from_millis(1200);
/// Minimum collection window for AT passthrough.
pub const AT_MIN_TIMEOUT: Duration = Duration::from_secs(5);
/// Minimum collection window for direct and health commands.
pub const DIRECT_MIN_TIMEOUT: Duration = Duration::from_secs(8);
/// Silence that ends a collection once at least one line arrived.
pub const QUIET_PERIOD: Duration = Duration::from_millis(200);

const TOKEN_PAUSE: Duration = Duration::from_millis(30);
const LINE_PAUSE: Duration = Duration::from_millis(50);

static PONG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bPONG\b").expect("PONG pattern is valid"));

/// Whether `line` contains the word `PONG`, in any case.
pub fn is_pong(line: &str) -> bool {
    PONG.is_match(line)
}

/// Extract the JSON object spanning the last `{` to the last `}` of `text`.
///
/// Returns `None` when there is no such span or it does not parse.
///
/// # Example
///
/// ```
/// use sensorgate_core::bridge::protocol::extract_location;
///
/// let text = "GPS fix\n{\"lat\":1,\"lon\":2}\nOK";
/// assert_eq!(extract_location(text), Some(serde_json::json!({"lat": 1, "lon": 2})));
/// ```
pub fn extract_location(text: &str) -> Option<Value> {
    let text = text.trim();
    let start = text.rfind('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Write [`PING`] and wait for `PONG`.
pub async fn probe(transport: &mut dyn SerialTransport) -> Result<bool> {
    transport.write_line(PING).await?;
    let deadline = Instant::now() + PROBE_TIMEOUT;
    while let Some(line) = transport.read_line(deadline).await? {
        if is_pong(&line) {
            debug!("PING OK");
            return Ok(true);
        }
    }
    debug!("PING FAIL");
    Ok(false)
}

/// Write [`GPS_QUERY`] and return the first location object that parses.
pub async fn locate(transport: &mut dyn SerialTransport) -> Result<Option<Value>> {
    transport.write_line(GPS_QUERY).await?;
    let deadline = Instant::now() + LOCATE_TIMEOUT;
    let mut seen: Vec<String> = Vec::new();
    while let Some(line) = transport.read_line(deadline).await? {
        if line.is_empty() {
            continue;
        }
        seen.push(line);
        if let Some(location) = extract_location(&seen.join("\n")) {
            return Ok(Some(location));
        }
    }
    Ok(None)
}

/// Send one uplink message. No acknowledgment is read back.
pub async fn publish(transport: &mut dyn SerialTransport, topic: &str, payload: &str) -> Result<bool> {
    transport.write_line(TOPIC).await?;
    sleep(TOKEN_PAUSE).await;
    transport.write_line(topic).await?;
    sleep(LINE_PAUSE).await;
    transport.write_line(PAYLOAD).await?;
    sleep(TOKEN_PAUSE).await;
    transport.write_line(payload).await?;
    sleep(LINE_PAUSE).await;
    transport.write_line(END).await?;
    Ok(true)
}

/// Run one AT command through the controller's passthrough.
pub async fn send_at(
    transport: &mut dyn SerialTransport,
    command: &str,
    timeout: Duration,
) -> Result<String> {
    transport.write_line(AT_ENTRY).await?;
    // Any line counts as the prompt; its absence is tolerated.
    let prompt_deadline = Instant::now() + AT_PROMPT_TIMEOUT;
    if let Some(prompt) = transport.read_line(prompt_deadline).await? {
        debug!("AT prompt {:?}", prompt);
    }
    transport.write_line(command).await?;
    collect_lines(transport, timeout.max(AT_MIN_TIMEOUT)).await
}

/// Write `command` verbatim and collect the reply.
pub async fn send_direct(
    transport: &mut dyn SerialTransport,
    command: &str,
    timeout: Duration,
) -> Result<String> {
    transport.write_line(command).await?;
    collect_lines(transport, timeout.max(DIRECT_MIN_TIMEOUT)).await
}

/// Request link health, tagging the request with `timestamp_ms`.
pub async fn health(
    transport: &mut dyn SerialTransport,
    timestamp_ms: i64,
    timeout: Duration,
) -> Result<String> {
    transport.write_line(HEALTH_TS).await?;
    sleep(LINE_PAUSE).await;
    transport.write_line(&timestamp_ms.to_string()).await?;
    collect_lines(transport, timeout.max(DIRECT_MIN_TIMEOUT)).await
}

/// Collect lines until `window` elapses, or until [`QUIET_PERIOD`] passes
/// without input after at least one line.
pub async fn collect_lines(transport: &mut dyn SerialTransport, window: Duration) -> Result<String> {
    let end = Instant::now() + window;
    let mut lines: Vec<String> = Vec::new();
    let mut last: Option<Instant> = None;
    loop {
        let deadline = match last {
            Some(at) => end.min(at + QUIET_PERIOD),
            None => end,
        };
        match transport.read_line(deadline).await? {
            Some(line) => {
                lines.push(line);
                last = Some(Instant::now());
            }
            None => break,
        }
    }
    Ok(lines.join("\n"))
}

/// Read and discard lines until `deadline`. Errors are ignored.
pub async fn drain(transport: &mut dyn SerialTransport, deadline: Instant) {
    loop {
        match transport.read_line(deadline).await {
            Ok(Some(line)) => debug!("DRN <= {:?}", line),
            Ok(None) | Err(_) => break,
        }
    }
}
