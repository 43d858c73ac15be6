//! Fixed 64-byte log header
//!
//! Layout (little-endian):
//!
//! | offset | v1 (`0x01xx`)          | v2 (`>= 0x0200`)       |
//! |--------|------------------------|------------------------|
//! | 0      | magic `[u8; 8]`        | magic `[u8; 8]`        |
//! | 8      | format_ver `u16`       | format_ver `u16`       |
//! | 10     | device_uid `u64`       | device_uid `u64`       |
//! | 18     | start_unix_ms `u64`    | start_unix_ms `u64`    |
//! | 26     | odr_hz `u16`           | odr_hz `u16`           |
//! | 28     | range_g `u16`          | range_g `u16`          |
//! | 30     | total_samples `u32`    | gyro_range_dps `u16`   |
//! | 32/34  | dropped_samples `u32`  | total_samples `u32`    |
//! |        | reserved, zero filled  | dropped_samples `u32`  |

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};

use super::DecodeError;

/// Size of the header on disk
pub const HEADER_SIZE: usize = 64;

/// Current magic marker
pub const MAGIC: &[u8; 8] = b"ACCLOG\0\0";

/// Seven-byte marker written by early firmware
pub const MAGIC_LEGACY: &[u8; 7] = b"ACCLOG\0";

/// Marker text without padding
pub const MAGIC_BARE: &[u8; 6] = b"ACCLOG";

/// Accelerometer-only format
pub const FORMAT_V1: u16 = 0x0100;

/// Accelerometer + gyroscope format
pub const FORMAT_V2: u16 = 0x0200;

/// Defaults used when a file carries no header
pub const DEFAULT_ODR_HZ: u16 = 200;
/// Accelerometer range assumed for headerless files
pub const DEFAULT_RANGE_G: u16 = 4;
/// Gyroscope range assumed for headerless files
pub const DEFAULT_GYRO_RANGE_DPS: u16 = 2000;

/// Decoded log header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogHeader {
    /// Marker bytes as stored
    pub magic: [u8; 8],
    /// `0x01xx` accelerometer only, `0x02xx` adds gyroscope
    pub format_ver: u16,
    /// Low bytes of the board MAC, 0 when unknown
    pub device_uid: u64,
    /// Device's estimate of recording start, 0 when unknown
    pub start_unix_ms: u64,
    /// Output data rate
    pub odr_hz: u16,
    /// Accelerometer full scale, ±g
    pub range_g: u16,
    /// Zero on v1 files
    pub gyro_range_dps: u16,
    /// Samples the device wrote
    pub total_samples: u32,
    /// Samples lost to buffer overruns
    pub dropped_samples: u32,
}

impl LogHeader {
    /// Parse a header from the first 64 bytes of `bytes`
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(DecodeError::MalformedHeader(format!(
                "header too short: {} of {} bytes",
                bytes.len(),
                HEADER_SIZE
            )));
        }

        let mut cur = Cursor::new(&bytes[..HEADER_SIZE]);
        let mut magic = [0u8; 8];
        cur.read_exact(&mut magic)?;
        if !magic.starts_with(MAGIC_BARE) {
            return Err(DecodeError::MalformedHeader(format!(
                "invalid magic {:02x?}",
                magic
            )));
        }

        let format_ver = cur.read_u16::<LittleEndian>()?;
        let device_uid = cur.read_u64::<LittleEndian>()?;
        let start_unix_ms = cur.read_u64::<LittleEndian>()?;
        let odr_hz = cur.read_u16::<LittleEndian>()?;
        let range_g = cur.read_u16::<LittleEndian>()?;
        let gyro_range_dps = if format_ver >= FORMAT_V2 {
            cur.read_u16::<LittleEndian>()?
        } else {
            0
        };
        let total_samples = cur.read_u32::<LittleEndian>()?;
        let dropped_samples = cur.read_u32::<LittleEndian>()?;

        let header = Self {
            magic,
            format_ver,
            device_uid,
            start_unix_ms,
            odr_hz,
            range_g,
            gyro_range_dps,
            total_samples,
            dropped_samples,
        };
        header.validate()?;
        Ok(header)
    }

    /// Reject values that would make the time base or scaling meaningless
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.odr_hz == 0 {
            return Err(DecodeError::MalformedHeader("odr_hz is 0".into()));
        }
        if self.range_g == 0 {
            return Err(DecodeError::MalformedHeader("range_g is 0".into()));
        }
        Ok(())
    }

    /// Serialize to the on-disk layout, reserved bytes zeroed
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..8].copy_from_slice(&self.magic);
        LittleEndian::write_u16(&mut out[8..10], self.format_ver);
        LittleEndian::write_u64(&mut out[10..18], self.device_uid);
        LittleEndian::write_u64(&mut out[18..26], self.start_unix_ms);
        LittleEndian::write_u16(&mut out[26..28], self.odr_hz);
        LittleEndian::write_u16(&mut out[28..30], self.range_g);
        let counts = if self.has_gyro() {
            LittleEndian::write_u16(&mut out[30..32], self.gyro_range_dps);
            32
        } else {
            30
        };
        LittleEndian::write_u32(&mut out[counts..counts + 4], self.total_samples);
        LittleEndian::write_u32(&mut out[counts + 4..counts + 8], self.dropped_samples);
        out
    }

    /// Header used for files with no magic
    pub fn synthesized(channels: usize) -> Self {
        let six = channels == 6;
        Self {
            magic: *MAGIC,
            format_ver: if six { FORMAT_V2 } else { FORMAT_V1 },
            device_uid: 0,
            start_unix_ms: 0,
            odr_hz: DEFAULT_ODR_HZ,
            range_g: DEFAULT_RANGE_G,
            gyro_range_dps: DEFAULT_GYRO_RANGE_DPS,
            total_samples: 0,
            dropped_samples: 0,
        }
    }

    /// True when samples carry gyroscope channels
    pub fn has_gyro(&self) -> bool {
        self.format_ver >= FORMAT_V2
    }

    /// int16 channels per sample
    pub fn channels(&self) -> usize {
        if self.has_gyro() {
            6
        } else {
            3
        }
    }

    /// Raw accelerometer counts per g
    pub fn lsb_per_g(&self) -> f64 {
        32768.0 / f64::from(self.range_g)
    }
}
