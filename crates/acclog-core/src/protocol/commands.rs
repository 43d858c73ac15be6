//! Protocol commands
//!
//! The newline-terminated ASCII commands understood by the logger firmware,
//! and parsers for the response lines that carry data.

use serde::{Deserialize, Serialize};

use super::ProtocolError;

/// Commands understood by the logger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Liveness check, answered with `PONG`
    Ping,

    /// Status snapshot as one JSON line
    Info,

    /// Bulk log transfer: `OK <size> [<millis>]`, payload, `DONE`
    Dump,

    /// Hex peek at the first 64 bytes of the stored log
    Head,

    /// Delete the stored log
    Erase,

    /// Start recording
    Start,

    /// Stop recording
    Stop,

    /// IMU register dump
    Regs,
}

impl Command {
    /// Command keyword as sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Ping => "PING",
            Command::Info => "INFO",
            Command::Dump => "DUMP",
            Command::Head => "HEAD",
            Command::Erase => "ERASE",
            Command::Start => "START",
            Command::Stop => "STOP",
            Command::Regs => "REGS",
        }
    }

    /// Wire bytes including the terminating newline
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.as_str().as_bytes().to_vec();
        bytes.push(b'\n');
        bytes
    }

    /// Whether success is signalled by a bare `OK` line
    pub fn acknowledged_with_ok(&self) -> bool {
        matches!(self, Command::Erase | Command::Start | Command::Stop)
    }
}

/// Parsed `OK <total_bytes> [<device_now_ms>]` line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OkResponse {
    /// Payload size the device is about to send
    pub total_bytes: u64,
    /// Device `millis()` at the time of the reply
    pub device_now_ms: Option<u64>,
}

/// Parse the reply to `DUMP`.
///
/// The size token is mandatory. The clock token only exists on newer
/// firmware; an unreadable one is dropped rather than failing the transfer.
pub fn parse_ok_line(line: &str) -> Result<OkResponse, ProtocolError> {
    if !line.starts_with("OK") {
        return Err(ProtocolError::ProtocolViolation(format!(
            "unexpected response to DUMP: {:?}",
            line
        )));
    }
    let mut tokens = line.split_whitespace().skip(1);
    let total_bytes = tokens
        .next()
        .and_then(|t| t.parse::<u64>().ok())
        .ok_or_else(|| {
            ProtocolError::ProtocolViolation(format!("failed to parse size from {:?}", line))
        })?;
    let device_now_ms = match tokens.next() {
        Some(t) => match t.parse::<u64>() {
            Ok(ms) => Some(ms),
            Err(_) => {
                tracing::warn!(token = t, "ignoring unreadable device clock in OK line");
                None
            }
        },
        None => None,
    };
    Ok(OkResponse {
        total_bytes,
        device_now_ms,
    })
}

/// Parse `HEAD <hex>`; a bare `HEAD` means the device holds no log
pub fn parse_head_line(line: &str) -> Result<Vec<u8>, ProtocolError> {
    let rest = line.strip_prefix("HEAD").ok_or_else(|| {
        ProtocolError::ProtocolViolation(format!("unexpected response to HEAD: {:?}", line))
    })?;
    let hex_part = rest.trim();
    if hex_part.is_empty() {
        return Ok(Vec::new());
    }
    hex::decode(hex_part)
        .map_err(|e| ProtocolError::ProtocolViolation(format!("bad HEAD hex: {}", e)))
}
