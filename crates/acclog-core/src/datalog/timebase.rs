//! Absolute start-time reconstruction
//!
//! Samples only carry `index / odr_hz`. Anchoring them to wall-clock time
//! needs either the device's own stamp in the header or the clock pair
//! captured during the dump.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::LogHeader;
use crate::protocol::DumpSession;

/// Smallest `start_unix_ms` treated as wall-clock time (2000-01-01).
/// Anything below is a device uptime stamp.
const WALL_CLOCK_FLOOR_MS: u64 = 946_684_800_000;

/// What the estimate was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartBasis {
    /// Header carried a wall-clock start
    DeviceWallClock,
    /// Header carried an uptime start, mapped through the dump's clock pair
    DeviceUptime,
    /// Assumed the recording ended when the dump began
    InferredDuration,
}

/// Estimated timestamp of sample 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartEstimate {
    /// UTC time of sample 0
    pub start: DateTime<Utc>,
    /// What the estimate rests on
    pub basis: StartBasis,
}

/// Best available estimate of when sample 0 was taken
pub fn estimate_start_time(
    header: &LogHeader,
    sample_count: usize,
    session: Option<&DumpSession>,
) -> Option<StartEstimate> {
    if header.start_unix_ms >= WALL_CLOCK_FLOOR_MS {
        let start = DateTime::from_timestamp_millis(i64::try_from(header.start_unix_ms).ok()?)?;
        return Some(StartEstimate {
            start,
            basis: StartBasis::DeviceWallClock,
        });
    }

    let session = session?;

    if let Some(now_ms) = session.device_now_ms {
        if header.start_unix_ms > 0 && now_ms >= header.start_unix_ms {
            let back = TimeDelta::try_milliseconds(i64::try_from(now_ms - header.start_unix_ms).ok()?)?;
            return Some(StartEstimate {
                start: session.pc_ok_rx_time.checked_sub_signed(back)?,
                basis: StartBasis::DeviceUptime,
            });
        }
    }

    if header.odr_hz == 0 {
        return None;
    }
    let duration_ms = (sample_count as u64).saturating_mul(1000) / u64::from(header.odr_hz);
    let back = TimeDelta::try_milliseconds(i64::try_from(duration_ms).ok()?)?;
    Some(StartEstimate {
        start: session.pc_ok_rx_time.checked_sub_signed(back)?,
        basis: StartBasis::InferredDuration,
    })
}
