//! Bulk log retrieval
//!
//! `DUMP` is answered with `OK <size> [<device millis>]`, the raw log file,
//! then `DONE`. Some firmware revisions emit stray text between the `OK` line
//! and the payload, so the transfer hunts for the header magic before it
//! starts copying.
//!
//! [`DumpTransfer`] runs the exchange step by step as an iterator of
//! [`DumpEvent`]s, one per protocol step or copied chunk. [`dump`] drives it
//! to completion for callers that only want the outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use super::commands::parse_ok_line;
use super::connection::{negotiate, LinkConfig, SerialLink};
use super::serial::{Link, PortOpener};
use super::{Command, ProtocolError};
use crate::datalog::header::{MAGIC, MAGIC_LEGACY};
use crate::datalog::find_magic;

/// How the start of the payload was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderSync {
    /// Magic matched; `preamble` bytes before it were discarded
    Aligned {
        /// Bytes discarded before the marker
        preamble: usize,
        /// 8 for `ACCLOG\0\0`, 7 for the legacy marker
        magic_len: usize,
    },
    /// Magic never matched within the read bound. `scanned` bytes were
    /// written from `magic_offset` if the marker turned up in them, else
    /// from the beginning.
    BestEffort {
        /// Bytes read during the scan
        scanned: usize,
        /// Position of a bare `ACCLOG` within them
        magic_offset: Option<usize>,
    },
}

/// Outcome of a completed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpSession {
    /// Payload size declared by the device
    pub total_bytes: u64,
    /// Device `millis()` when it sent `OK`, if reported
    pub device_now_ms: Option<u64>,
    /// Host time the `OK` line arrived
    pub pc_ok_rx_time: DateTime<Utc>,
    /// Baud rate the transfer ran at
    pub baud: u32,
    /// `None` for an empty log
    pub sync: Option<HeaderSync>,
}

/// Step-by-step progress of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpEvent {
    /// The device accepted `DUMP`
    Accepted {
        /// Declared payload size
        total_bytes: u64,
        /// Device clock at the reply, if sent
        device_now_ms: Option<u64>,
    },
    /// Payload start located
    Synced(HeaderSync),
    /// Bytes written so far
    Progress {
        /// Payload bytes written
        done: u64,
        /// Declared payload size
        total: u64,
    },
    /// Trailer received; the transfer is over
    Completed(DumpSession),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Request,
    Sync,
    Bulk,
    Trailer,
    Finished,
}

/// A `DUMP` exchange over a borrowed link, written to `out`
pub struct DumpTransfer<'a, L: Link, W: Write> {
    link: &'a mut SerialLink<L>,
    out: W,
    config: &'a LinkConfig,
    state: State,
    total: u64,
    remaining: u64,
    device_now_ms: Option<u64>,
    pc_ok_rx_time: Option<DateTime<Utc>>,
    sync: Option<HeaderSync>,
    pending: Option<DumpEvent>,
    chunk: Vec<u8>,
}

impl<'a, L: Link, W: Write> DumpTransfer<'a, L, W> {
    /// Prepare a transfer; nothing is sent until the first `next()`
    pub fn new(link: &'a mut SerialLink<L>, out: W, config: &'a LinkConfig) -> Self {
        Self {
            link,
            out,
            config,
            state: State::Request,
            total: 0,
            remaining: 0,
            device_now_ms: None,
            pc_ok_rx_time: None,
            sync: None,
            pending: None,
            chunk: Vec::new(),
        }
    }

    /// Drive the transfer to completion
    pub fn run(self) -> Result<DumpSession, ProtocolError> {
        for event in self {
            if let DumpEvent::Completed(session) = event? {
                return Ok(session);
            }
        }
        Err(ProtocolError::ProtocolViolation(
            "transfer ended without a DONE trailer".into(),
        ))
    }

    fn progress(&self) -> DumpEvent {
        DumpEvent::Progress {
            done: self.total - self.remaining,
            total: self.total,
        }
    }

    fn request(&mut self) -> Result<DumpEvent, ProtocolError> {
        self.link.clear_input()?;
        self.link.send_command(Command::Dump)?;
        let line = self.link.read_line()?;
        self.pc_ok_rx_time = Some(Utc::now());

        let ok = parse_ok_line(&line)?;
        self.total = ok.total_bytes;
        self.remaining = ok.total_bytes;
        self.device_now_ms = ok.device_now_ms;
        tracing::info!(
            port = %self.link.port(),
            total_bytes = ok.total_bytes,
            device_now_ms = ?ok.device_now_ms,
            "DUMP accepted"
        );

        self.state = if ok.total_bytes == 0 {
            State::Trailer
        } else {
            State::Sync
        };
        Ok(DumpEvent::Accepted {
            total_bytes: ok.total_bytes,
            device_now_ms: ok.device_now_ms,
        })
    }

    /// Read one byte at a time until the trailing bytes form a magic marker.
    ///
    /// The scan never reads past the declared payload size, so the `DONE`
    /// trailer is left on the link when no marker turns up.
    fn sync(&mut self) -> Result<DumpEvent, ProtocolError> {
        let mut scanned: Vec<u8> = Vec::new();
        let mut idle = 0u32;
        let mut byte = [0u8; 1];
        let bound = self
            .config
            .sync_max_reads
            .min(usize::try_from(self.remaining).unwrap_or(usize::MAX));

        while scanned.len() < bound {
            if self.link.read_some(&mut byte)? == 0 {
                idle += 1;
                if idle >= self.config.sync_idle_reads.max(1) {
                    break;
                }
                continue;
            }
            idle = 0;
            scanned.push(byte[0]);

            let magic: Option<&[u8]> = if scanned.ends_with(MAGIC) {
                Some(&MAGIC[..])
            } else if scanned.ends_with(MAGIC_LEGACY) {
                Some(&MAGIC_LEGACY[..])
            } else {
                None
            };
            if let Some(magic) = magic {
                let preamble = scanned.len() - magic.len();
                if preamble > 0 {
                    tracing::info!(
                        preamble,
                        bytes = ?String::from_utf8_lossy(&scanned[..preamble]),
                        "discarded bytes before log header"
                    );
                }
                self.write_payload(magic)?;
                let sync = HeaderSync::Aligned {
                    preamble,
                    magic_len: magic.len(),
                };
                return Ok(self.synced(sync));
            }
        }

        if scanned.is_empty() {
            return Err(ProtocolError::Timeout("waiting for log header"));
        }

        let magic_offset = find_magic(&scanned);
        tracing::warn!(
            scanned = scanned.len(),
            magic_offset = ?magic_offset,
            "log header not detected, writing received bytes as-is"
        );
        let start = magic_offset.unwrap_or(0);
        self.write_payload(&scanned[start..])?;
        let sync = HeaderSync::BestEffort {
            scanned: scanned.len(),
            magic_offset,
        };
        Ok(self.synced(sync))
    }

    fn synced(&mut self, sync: HeaderSync) -> DumpEvent {
        self.sync = Some(sync);
        self.pending = Some(self.progress());
        self.state = State::Bulk;
        DumpEvent::Synced(sync)
    }

    /// Write payload bytes, never more than the device declared
    fn write_payload(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let take = bytes.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        self.out.write_all(&bytes[..take])?;
        self.remaining -= take as u64;
        Ok(())
    }

    fn bulk(&mut self) -> Result<DumpEvent, ProtocolError> {
        let chunk_size = self.config.chunk_size.max(1);
        if self.chunk.len() != chunk_size {
            self.chunk = vec![0u8; chunk_size];
        }
        let want = chunk_size.min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.link.read_some(&mut self.chunk[..want])?;
        if n == 0 {
            return Err(ProtocolError::Timeout("receiving log data"));
        }
        self.out.write_all(&self.chunk[..n])?;
        self.remaining -= n as u64;
        if self.remaining == 0 {
            self.state = State::Trailer;
        }
        Ok(self.progress())
    }

    fn trailer(&mut self) -> Result<DumpEvent, ProtocolError> {
        self.out.flush()?;
        for _ in 0..self.config.trailer_max_lines.max(1) {
            let line = self.link.read_line()?;
            if line.is_empty() {
                continue;
            }
            if line != "DONE" {
                return Err(ProtocolError::ProtocolViolation(format!(
                    "unexpected trailer: {:?}",
                    line
                )));
            }

            let session = DumpSession {
                total_bytes: self.total,
                device_now_ms: self.device_now_ms,
                pc_ok_rx_time: self.pc_ok_rx_time.unwrap_or_else(Utc::now),
                baud: self.link.baud(),
                sync: self.sync,
            };
            tracing::info!(port = %self.link.port(), total_bytes = self.total, "DUMP complete");
            self.state = State::Finished;
            return Ok(DumpEvent::Completed(session));
        }
        Err(ProtocolError::Timeout("waiting for DONE trailer"))
    }

    fn step(&mut self) -> Result<DumpEvent, ProtocolError> {
        loop {
            match self.state {
                State::Request => return self.request(),
                State::Sync => return self.sync(),
                State::Bulk if self.remaining == 0 => self.state = State::Trailer,
                State::Bulk => return self.bulk(),
                State::Trailer => return self.trailer(),
                State::Finished => {
                    return Err(ProtocolError::ProtocolViolation("transfer already finished".into()))
                }
            }
        }
    }
}

impl<L: Link, W: Write> Iterator for DumpTransfer<'_, L, W> {
    type Item = Result<DumpEvent, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(event) = self.pending.take() {
            return Some(Ok(event));
        }
        if self.state == State::Finished {
            return None;
        }
        let result = self.step();
        if result.is_err() {
            self.state = State::Finished;
        }
        Some(result)
    }
}

/// Negotiate a link on `port` and dump the stored log into `out`
pub fn dump<O: PortOpener, W: Write>(
    opener: &O,
    port: &str,
    out: W,
    config: &LinkConfig,
) -> Result<DumpSession, ProtocolError> {
    let (mut link, _baud) = negotiate(opener, port, config)?;
    DumpTransfer::new(&mut link, out, config).run()
}

/// Like [`dump`], writing to a file; parent directories are created.
///
/// On failure the partial file is left in place.
pub fn dump_to_file<O: PortOpener>(
    opener: &O,
    port: &str,
    path: &Path,
    config: &LinkConfig,
) -> Result<DumpSession, ProtocolError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    dump(opener, port, file, config)
}
