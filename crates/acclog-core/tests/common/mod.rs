//! Scripted stand-in for the logger firmware

#![allow(dead_code)]

use acclog_core::datalog::LogHeader;
use acclog_core::protocol::{Link, LinkConfig, PortOpener};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Everything the mock saw, shared across every link it opened
#[derive(Debug, Default)]
pub struct Journal {
    /// Baud of every open attempt, successful or not
    pub opens: Vec<u32>,
    /// (baud, command line) for every command received
    pub commands: Vec<(u32, String)>,
    /// Links currently open
    pub live_links: i32,
    /// Timeouts applied through `set_timeout`
    pub timeouts: Vec<Duration>,
}

impl Journal {
    pub fn commands_at(&self, baud: u32) -> Vec<String> {
        self.commands
            .iter()
            .filter(|(b, _)| *b == baud)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

/// Replies per command; the last reply in a queue is repeated forever
#[derive(Debug, Clone, Default)]
pub struct Script {
    replies: HashMap<String, VecDeque<Vec<u8>>>,
    /// Largest number of bytes returned by one read
    pub max_read: Option<usize>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that answers PING
    pub fn responsive() -> Self {
        Self::new().on("PING", b"PONG\r\n")
    }

    pub fn on(mut self, cmd: &str, reply: &[u8]) -> Self {
        self.replies
            .entry(cmd.to_string())
            .or_default()
            .push_back(reply.to_vec());
        self
    }

    fn reply_to(&mut self, cmd: &str) -> Option<Vec<u8>> {
        let queue = self.replies.get_mut(cmd)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

pub struct MockLink {
    baud: u32,
    script: Script,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    timeout: Duration,
    journal: Arc<Mutex<Journal>>,
}

impl Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out"));
        }
        let limit = self.script.max_read.unwrap_or(usize::MAX).min(buf.len());
        let n = limit.min(self.rx.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.rx.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &b in buf {
            if b == b'\n' {
                let line = String::from_utf8_lossy(&self.tx).trim().to_string();
                self.tx.clear();
                self.journal
                    .lock()
                    .unwrap()
                    .commands
                    .push((self.baud, line.clone()));
                if let Some(reply) = self.script.reply_to(&line) {
                    self.rx.extend(reply);
                }
            } else {
                self.tx.push(b);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Link for MockLink {
    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeout = timeout;
        self.journal.lock().unwrap().timeouts.push(timeout);
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.rx.clear();
        Ok(())
    }

    fn set_control_lines(&mut self, _dtr: bool, _rts: bool) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        if let Ok(mut j) = self.journal.lock() {
            j.live_links -= 1;
        }
    }
}

/// Opens [`MockLink`]s with a script chosen by baud rate
#[derive(Default)]
pub struct MockOpener {
    scripts: HashMap<u32, Script>,
    /// Bauds whose open always fails with this message
    failing: HashMap<u32, String>,
    /// Opens that fail with an I/O error before any succeeds
    flaky_opens: Mutex<u32>,
    pub journal: Arc<Mutex<Journal>>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, baud: u32, script: Script) -> Self {
        self.scripts.insert(baud, script);
        self
    }

    pub fn failing(mut self, baud: u32, message: &str) -> Self {
        self.failing.insert(baud, message.to_string());
        self
    }

    pub fn flaky(self, failures: u32) -> Self {
        *self.flaky_opens.lock().unwrap() = failures;
        self
    }

    pub fn journal(&self) -> std::sync::MutexGuard<'_, Journal> {
        self.journal.lock().unwrap()
    }
}

impl PortOpener for MockOpener {
    type Link = MockLink;

    fn open(
        &self,
        _port: &str,
        baud: u32,
        timeout: Duration,
    ) -> Result<MockLink, serialport::Error> {
        self.journal.lock().unwrap().opens.push(baud);

        if let Some(msg) = self.failing.get(&baud) {
            return Err(serialport::Error::new(serialport::ErrorKind::Unknown, msg.clone()));
        }
        {
            let mut flaky = self.flaky_opens.lock().unwrap();
            if *flaky > 0 {
                *flaky -= 1;
                return Err(serialport::Error::new(
                    serialport::ErrorKind::Unknown,
                    "Input/output error",
                ));
            }
        }

        self.journal.lock().unwrap().live_links += 1;
        Ok(MockLink {
            baud,
            // An unscripted baud is a device that never answers
            script: self.scripts.get(&baud).cloned().unwrap_or_default(),
            rx: VecDeque::new(),
            tx: Vec::new(),
            timeout,
            journal: Arc::clone(&self.journal),
        })
    }
}

/// Config with every delay removed
pub fn fast_config(bauds: &[u32]) -> LinkConfig {
    LinkConfig {
        candidate_bauds: bauds.to_vec(),
        open_retry_delay_ms: 0,
        settle_delay_ms: 0,
        info_backoff_ms: 0,
        ..LinkConfig::default()
    }
}

/// A v2 header followed by `samples` six-channel samples
pub fn v2_log(samples: usize) -> Vec<u8> {
    let mut header = LogHeader::synthesized(6);
    header.format_ver = 0x0201;
    header.device_uid = 0xA1B2_C3D4;
    header.range_g = 8;
    header.total_samples = samples as u32;
    let mut buf = header.encode().to_vec();
    for i in 0..samples {
        for ch in 0..6i16 {
            let v = (i as i16).wrapping_mul(10).wrapping_add(ch);
            buf.extend_from_slice(&v.to_be_bytes());
        }
    }
    buf
}

/// Full device reply to DUMP: OK line, optional preamble, payload, trailer
pub fn dump_reply(payload: &[u8], preamble: &[u8], trailer: &[u8]) -> Vec<u8> {
    let mut reply = format!("OK {} 123456\n", payload.len()).into_bytes();
    reply.extend_from_slice(preamble);
    reply.extend_from_slice(payload);
    reply.extend_from_slice(trailer);
    reply
}
