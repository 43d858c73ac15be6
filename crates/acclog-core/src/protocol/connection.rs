//! Connection management
//!
//! Owns an open link, implements the line-oriented request/response helpers,
//! the `PING`/`PONG` handshake and baud-rate negotiation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::time::Duration;

use super::serial::{open_link, Link, PortOpener};
use super::{Command, ProtocolError, DEFAULT_BAUDS, DEFAULT_TIMEOUT_MS};

/// Longest line accepted before giving up on a newline
const MAX_LINE_LEN: usize = 4096;

/// Tunables for opening, handshaking and transferring.
///
/// Every field has a default matching the firmware's behavior; the struct is
/// threaded explicitly through every operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Baud rates to try, in order
    pub candidate_bauds: Vec<u32>,
    /// Open attempts per baud
    pub open_attempts: u32,
    /// Delay between open attempts in milliseconds
    pub open_retry_delay_ms: u64,
    /// Wait after open for the board to finish resetting
    pub settle_delay_ms: u64,
    /// Read timeout for the lifetime of the link
    pub timeout_ms: u64,
    /// PING attempts per baud
    pub ping_attempts: u32,
    /// Read timeout used while waiting for PONG
    pub ping_timeout_ms: u64,
    /// INFO attempts before giving up
    pub info_attempts: u32,
    /// Delay between INFO attempts in milliseconds
    pub info_backoff_ms: u64,
    /// Largest single read during bulk copy
    pub chunk_size: usize,
    /// Single-byte reads allowed while hunting for the header magic
    pub sync_max_reads: usize,
    /// Consecutive empty reads that end the magic hunt
    pub sync_idle_reads: u32,
    /// Lines read while waiting for the DONE trailer
    pub trailer_max_lines: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            candidate_bauds: DEFAULT_BAUDS.to_vec(),
            open_attempts: 3,
            open_retry_delay_ms: 500,
            settle_delay_ms: 1000,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            ping_attempts: 3,
            ping_timeout_ms: 300,
            info_attempts: 3,
            info_backoff_ms: 200,
            chunk_size: 32 * 1024,
            sync_max_reads: 64 * 1024,
            sync_idle_reads: 3,
            trailer_max_lines: 8,
        }
    }
}

impl LinkConfig {
    /// Config that only tries one baud rate
    pub fn with_baud(baud: u32) -> Self {
        Self {
            candidate_bauds: vec![baud],
            ..Self::default()
        }
    }

    /// Per-read timeout
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Pause after opening before the first command
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Pause between open attempts
    pub fn open_retry_delay(&self) -> Duration {
        Duration::from_millis(self.open_retry_delay_ms)
    }

    /// Read timeout used while waiting for `PONG`
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// Pause between INFO attempts
    pub fn info_backoff(&self) -> Duration {
        Duration::from_millis(self.info_backoff_ms)
    }
}

/// An open, exclusively owned link to one port at one baud rate.
///
/// Dropping it closes the port.
pub struct SerialLink<L: Link> {
    inner: L,
    port: String,
    baud: u32,
}

impl<L: Link> fmt::Debug for SerialLink<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialLink")
            .field("port", &self.port)
            .field("baud", &self.baud)
            .finish_non_exhaustive()
    }
}

impl<L: Link> SerialLink<L> {
    /// Wrap an already opened link
    pub fn new(inner: L, port: &str, baud: u32) -> Self {
        Self {
            inner,
            port: port.to_string(),
            baud,
        }
    }

    /// Port name this link was opened on
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Baud rate this link was opened at
    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// Current read timeout
    pub fn timeout(&self) -> Duration {
        self.inner.timeout()
    }

    /// Change the read timeout
    pub fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.inner.set_timeout(timeout)
    }

    /// Discard received bytes not yet read
    pub fn clear_input(&mut self) -> io::Result<()> {
        self.inner.clear_input()
    }

    /// Access the underlying link
    pub fn get_mut(&mut self) -> &mut L {
        &mut self.inner
    }

    /// Close the link and hand back the underlying transport
    pub fn into_inner(self) -> L {
        self.inner
    }

    /// Write a newline-terminated command
    pub fn send_command(&mut self, cmd: Command) -> Result<(), ProtocolError> {
        tracing::trace!(port = %self.port, command = cmd.as_str(), "send");
        self.inner.write_all(&cmd.to_bytes())?;
        self.inner.flush()?;
        Ok(())
    }

    /// Read up to `buf.len()` bytes; a read timeout is reported as `Ok(0)`
    pub fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        match self.inner.read(buf) {
            Ok(n) => Ok(n),
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(0)
            }
            Err(e) => Err(ProtocolError::Io(e)),
        }
    }

    /// Read one line, trimmed of surrounding whitespace.
    ///
    /// A timeout ends the line early, so a silent device yields an empty
    /// string rather than an error.
    pub fn read_line(&mut self) -> Result<String, ProtocolError> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        while line.len() < MAX_LINE_LEN {
            if self.read_some(&mut byte)? == 0 {
                break;
            }
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }
        let text = String::from_utf8_lossy(&line).trim().to_string();
        tracing::trace!(port = %self.port, line = %text, "recv");
        Ok(text)
    }

    /// Send a command and read the first response line
    pub fn request(&mut self, cmd: Command) -> Result<String, ProtocolError> {
        self.send_command(cmd)?;
        self.read_line()
    }
}

/// Check that the device answers `PING` with `PONG` at the link's baud.
///
/// The read timeout is narrowed to `timeout` while probing and restored
/// afterwards. Exhausting `attempts` yields `false`, never an error.
pub fn ping<L: Link>(link: &mut SerialLink<L>, attempts: u32, timeout: Duration) -> bool {
    let original = link.timeout();
    if let Err(e) = link.set_timeout(timeout) {
        tracing::debug!(port = %link.port(), error = %e, "could not narrow timeout for ping");
    }

    let ok = (1..=attempts).any(|attempt| ping_once(link, attempt));

    if let Err(e) = link.set_timeout(original) {
        tracing::warn!(port = %link.port(), error = %e, "could not restore link timeout");
    }
    ok
}

fn ping_once<L: Link>(link: &mut SerialLink<L>, attempt: u32) -> bool {
    if let Err(e) = link.clear_input() {
        tracing::debug!(port = %link.port(), error = %e, "input flush failed before ping");
    }
    match link.request(Command::Ping) {
        Ok(line) if line == "PONG" => {
            tracing::debug!(port = %link.port(), baud = link.baud(), attempt, "PONG");
            true
        }
        Ok(line) => {
            tracing::debug!(port = %link.port(), baud = link.baud(), attempt, reply = %line, "no PONG");
            false
        }
        Err(e) => {
            tracing::debug!(port = %link.port(), baud = link.baud(), attempt, error = %e, "ping failed");
            false
        }
    }
}

/// Try each candidate baud in order and keep the first link that handshakes.
///
/// Links that open but do not answer are closed before the next candidate is
/// tried. When no candidate ever opened, the last open error is returned so
/// the caller sees the busy/I/O diagnosis; otherwise `HandshakeFailed`.
pub fn negotiate<O: PortOpener>(
    opener: &O,
    port: &str,
    config: &LinkConfig,
) -> Result<(SerialLink<O::Link>, u32), ProtocolError> {
    let mut tried = Vec::new();
    let mut last_open_err = None;
    let mut any_opened = false;

    for &baud in &config.candidate_bauds {
        tried.push(baud);
        let mut link = match open_link(opener, port, baud, config) {
            Ok(link) => link,
            Err(e) => {
                tracing::info!(port, baud, error = %e, "candidate baud did not open");
                last_open_err = Some(e);
                continue;
            }
        };
        any_opened = true;

        if ping(&mut link, config.ping_attempts, config.ping_timeout()) {
            tracing::info!(port, baud, "link established");
            return Ok((link, baud));
        }
        tracing::info!(port, baud, "no handshake, trying next baud");
    }

    match last_open_err {
        Some(e) if !any_opened => Err(e),
        _ => Err(ProtocolError::HandshakeFailed {
            port: port.to_string(),
            tried,
        }),
    }
}

/// Negotiate a link, run `op` on it, and close it on every exit path
pub fn with_link<O, T, F>(opener: &O, port: &str, config: &LinkConfig, op: F) -> Result<T, ProtocolError>
where
    O: PortOpener,
    F: FnOnce(&mut SerialLink<O::Link>) -> Result<T, ProtocolError>,
{
    let (mut link, _baud) = negotiate(opener, port, config)?;
    op(&mut link)
}
