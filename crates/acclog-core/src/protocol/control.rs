//! Device control and diagnostics
//!
//! `HEAD` peeks at the stored file's first bytes, `ERASE`/`START`/`STOP`
//! manage recording, `REGS` dumps IMU configuration registers.

use super::commands::parse_head_line;
use super::connection::SerialLink;
use super::serial::Link;
use super::{Command, ProtocolError};
use crate::datalog::{LogHeader, HEADER_SIZE};

/// Result of a `HEAD` peek
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadPeek {
    /// Raw bytes reported by the device (up to 64; empty when no log exists)
    pub bytes: Vec<u8>,
    /// Parsed header when the bytes hold a complete, valid one
    pub header: Option<LogHeader>,
}

/// Ask the device for the first bytes of its stored log
pub fn head<L: Link>(link: &mut SerialLink<L>) -> Result<HeadPeek, ProtocolError> {
    link.clear_input()?;
    let line = link.request(Command::Head)?;
    let bytes = parse_head_line(&line)?;
    let header = if bytes.len() >= HEADER_SIZE {
        match LogHeader::parse(&bytes) {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::debug!(error = %e, "HEAD bytes do not hold a valid header");
                None
            }
        }
    } else {
        None
    };
    Ok(HeadPeek { bytes, header })
}

/// Send a command that the device acknowledges with `OK`
pub fn control<L: Link>(link: &mut SerialLink<L>, cmd: Command) -> Result<(), ProtocolError> {
    if !cmd.acknowledged_with_ok() {
        return Err(ProtocolError::ProtocolViolation(format!(
            "{} is not a control command",
            cmd.as_str()
        )));
    }
    link.clear_input()?;
    let line = link.request(cmd)?;
    match line.as_str() {
        "OK" => {
            tracing::info!(port = %link.port(), command = cmd.as_str(), "acknowledged");
            Ok(())
        }
        "" => Err(ProtocolError::Timeout("waiting for OK")),
        other => Err(ProtocolError::ProtocolViolation(format!(
            "{} answered {:?}",
            cmd.as_str(),
            other
        ))),
    }
}

/// Fetch the `REGS ...` register dump line
pub fn regs<L: Link>(link: &mut SerialLink<L>) -> Result<String, ProtocolError> {
    link.clear_input()?;
    let line = link.request(Command::Regs)?;
    match line.strip_prefix("REGS") {
        Some(rest) => Ok(rest.trim().to_string()),
        None if line.is_empty() => Err(ProtocolError::Timeout("waiting for REGS")),
        None => Err(ProtocolError::ProtocolViolation(format!(
            "unexpected response to REGS: {:?}",
            line
        ))),
    }
}
