//! `INFO` status query
//!
//! The device answers `INFO` with a single JSON object. Older firmware sends
//! only a few fields, so missing labels and scale factors are derived from
//! the numeric fields that are present.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::connection::{negotiate, LinkConfig, SerialLink};
use super::serial::{Link, PortOpener};
use super::{Command, ProtocolError};

/// Device status snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfoRecord {
    /// Board MAC as hex
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Legacy ODR field from older firmware
    #[serde(skip_serializing_if = "Option::is_none")]
    pub odr: Option<u32>,
    /// Output data rate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub odr_hz: Option<u32>,
    /// Accelerometer range, ±g
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_g: Option<u32>,
    /// Gyroscope range, ±dps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gyro_dps: Option<u32>,
    /// Numeric IMU id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imu_type: Option<u32>,
    /// Numeric board id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_model: Option<u32>,
    /// Log format label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Log header version the firmware writes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_ver: Option<u32>,
    /// Raw counts per g
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lsb_per_g: Option<f64>,
    /// Raw counts per dps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lsb_per_dps: Option<f64>,
    /// Size of the stored log in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Flash filesystem capacity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fs_total: Option<u64>,
    /// Bytes in use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fs_used: Option<u64>,
    /// Bytes free
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fs_free: Option<u64>,
    /// Filesystem use as a percentage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fs_used_pct: Option<u32>,
    /// 1 when the stored log starts with a header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_head: Option<u32>,
    /// Board name, derived from `device_model` when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub board: Option<String>,
    /// IMU name, derived from `imu_type` when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imu: Option<String>,
    /// Baud rate the record was read at; filled in by the host
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baud: Option<u32>,
    /// Fields this version does not know about
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn board_from_model(model: Option<u32>) -> &'static str {
    match model {
        Some(1) => "stickc",
        Some(2) => "stickc_plus",
        Some(3) => "plus2",
        Some(10) | Some(11) => "core2",
        _ => "unknown",
    }
}

fn imu_from_type(imu_type: Option<u32>) -> &'static str {
    match imu_type {
        Some(1) => "sh200q",
        Some(2) => "mpu6886",
        _ => "unknown",
    }
}

fn missing(v: Option<f64>) -> bool {
    v.map_or(true, |x| x == 0.0)
}

impl InfoRecord {
    /// Parse one `INFO` line and fill derived fields
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let mut record: InfoRecord = serde_json::from_str(line)?;
        record.enrich();
        Ok(record)
    }

    /// Output data rate under either key the firmware has used
    pub fn odr(&self) -> Option<u32> {
        self.odr.or(self.odr_hz)
    }

    /// Whether the stored file starts with the magic marker
    pub fn has_header(&self) -> Option<bool> {
        self.has_head.map(|v| v != 0)
    }

    /// Fill fields the device left out; reported values are never replaced
    pub fn enrich(&mut self) {
        if self.format.as_deref().map_or(true, str::is_empty) {
            self.format = Some(match self.format_ver {
                Some(v) => format!("0x{:04X}", v),
                None => "unknown".to_string(),
            });
        }
        if self.board.is_none() {
            self.board = Some(board_from_model(self.device_model).to_string());
        }
        if self.imu.is_none() {
            self.imu = Some(imu_from_type(self.imu_type).to_string());
        }
        if missing(self.lsb_per_g) {
            self.lsb_per_g = self
                .range_g
                .filter(|&r| r > 0)
                .map(|r| 32768.0 / f64::from(r));
        }
        if missing(self.lsb_per_dps) {
            self.lsb_per_dps = self
                .gyro_dps
                .filter(|&r| r > 0)
                .map(|r| 32768.0 / f64::from(r));
        }
    }
}

impl fmt::Display for InfoRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Board={} IMU={}",
            self.board.as_deref().unwrap_or("unknown"),
            self.imu.as_deref().unwrap_or("unknown")
        )?;
        if let Some(fmt_str) = self.format.as_deref().filter(|s| !s.is_empty()) {
            write!(f, " Fmt={}", fmt_str)?;
        }
        if let Some(odr) = self.odr().filter(|&v| v > 0) {
            write!(f, " ODR={}Hz", odr)?;
        }
        if let Some(rg) = self.range_g.filter(|&v| v > 0) {
            write!(f, " Accel=±{}g", rg)?;
        }
        if let Some(gd) = self.gyro_dps.filter(|&v| v > 0) {
            write!(f, " Gyro=±{}dps", gd)?;
        }
        if let Some(pct) = self.fs_used_pct {
            write!(f, " FS={}%", pct)?;
        }
        if let Some(lsb) = self.lsb_per_g.filter(|&v| v != 0.0) {
            write!(f, " LSB/g={}", lsb)?;
        }
        if let Some(lsb) = self.lsb_per_dps.filter(|&v| v != 0.0) {
            write!(f, " LSB/dps={}", lsb)?;
        }
        Ok(())
    }
}

fn looks_like_json_object(line: &str) -> bool {
    line.starts_with('{') && line.ends_with('}')
}

/// Send `INFO` on an established link until a JSON object comes back
pub fn query_info<L: Link>(
    link: &mut SerialLink<L>,
    config: &LinkConfig,
) -> Result<InfoRecord, ProtocolError> {
    let attempts = config.info_attempts.max(1);
    let mut last_line = String::new();

    for attempt in 1..=attempts {
        link.clear_input()?;
        let line = link.request(Command::Info)?;
        if looks_like_json_object(&line) {
            let mut record = InfoRecord::parse(&line)?;
            record.baud = Some(link.baud());
            return Ok(record);
        }
        tracing::debug!(port = %link.port(), attempt, reply = %line, "INFO reply is not a JSON object");
        last_line = line;
        if attempt < attempts {
            std::thread::sleep(config.info_backoff());
        }
    }

    Err(ProtocolError::ProtocolViolation(format!(
        "no JSON reply to INFO after {} attempts (last: {:?})",
        attempts, last_line
    )))
}

/// Negotiate a link on `port` and query its status
pub fn info<O: PortOpener>(
    opener: &O,
    port: &str,
    config: &LinkConfig,
) -> Result<InfoRecord, ProtocolError> {
    let (mut link, _baud) = negotiate(opener, port, config)?;
    query_info(&mut link, config)
}
