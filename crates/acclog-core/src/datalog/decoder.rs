//! Binary log decoder
//!
//! Turns a captured `ACCLOG` file into a header plus scaled samples. Pure:
//! works on a byte buffer and performs no I/O of its own.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::header::{LogHeader, HEADER_SIZE, MAGIC, MAGIC_BARE, MAGIC_LEGACY};
use super::DecodeError;

/// How far into a headerless file to look for a sample-aligned start
const HEADERLESS_SCAN_BYTES: usize = 4096;

/// Where the header came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderSource {
    /// Parsed from a magic marker found at `offset`
    Header {
        /// Byte position of the marker
        offset: usize,
    },
    /// No magic; defaults assumed and samples start at `offset`
    Synthesized {
        /// Leading bytes skipped to align whole samples
        offset: usize,
    },
}

impl HeaderSource {
    /// True when the header was guessed rather than read
    pub fn is_synthesized(&self) -> bool {
        matches!(self, HeaderSource::Synthesized { .. })
    }
}

/// One decoded sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Position in the file, counting from 0
    pub index: u64,
    /// `index / odr_hz`
    pub t_sec: f64,
    /// Acceleration in g (x, y, z)
    pub accel_g: [f64; 3],
    /// Raw int16 values; the firmware stores the dps reading cast to int16
    pub gyro_dps: Option<[f64; 3]>,
}

/// Ordered, immutable decoded samples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleStream {
    samples: Vec<Sample>,
}

impl SampleStream {
    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when no samples were decoded
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Iterate in file order
    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    /// Samples as a slice
    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    /// Sample at `index`, if present
    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }
}

impl<'a> IntoIterator for &'a SampleStream {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

/// Result of decoding one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedLog {
    /// Parsed or synthesized header
    pub header: LogHeader,
    /// Where the header came from
    pub source: HeaderSource,
    /// Decoded samples in file order
    pub samples: SampleStream,
    /// Trailing bytes that did not form a whole sample
    pub dropped_bytes: usize,
}

impl DecodedLog {
    /// Channels per sample
    pub fn channels(&self) -> usize {
        self.header.channels()
    }

    /// Recording length implied by the sample count and ODR
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.header.odr_hz)
    }
}

/// Offset of the earliest magic marker in `buf`
pub fn find_magic(buf: &[u8]) -> Option<usize> {
    [&MAGIC[..], &MAGIC_LEGACY[..], &MAGIC_BARE[..]]
        .iter()
        .filter_map(|m| find_subsequence(buf, m))
        .min()
}

pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Earliest offset at which the rest of `buf` splits into whole samples.
///
/// At each offset six channels (12 bytes) are preferred over three (6 bytes).
fn headerless_alignment(buf: &[u8]) -> Option<(usize, usize)> {
    let scan = HEADERLESS_SCAN_BYTES.min(buf.len());
    (0..scan).find_map(|off| {
        let rest = buf.len() - off;
        if rest < 6 {
            None
        } else if rest % 12 == 0 {
            Some((off, 6))
        } else if rest % 6 == 0 {
            Some((off, 3))
        } else {
            None
        }
    })
}

/// Decode a captured log.
///
/// The header is located by magic search, so stray bytes before it are
/// tolerated. Files without any magic are treated as raw sample streams when
/// a sample-aligned offset exists; the returned [`HeaderSource`] says so.
pub fn decode(buf: &[u8]) -> Result<DecodedLog, DecodeError> {
    if buf.is_empty() {
        return Err(DecodeError::undecodable(buf));
    }

    let (header, source, payload_start) = match find_magic(buf) {
        Some(idx) => {
            if buf.len() - idx < HEADER_SIZE {
                return Err(DecodeError::MalformedHeader(format!(
                    "magic at offset {} but only {} bytes follow",
                    idx,
                    buf.len() - idx
                )));
            }
            let header = LogHeader::parse(&buf[idx..idx + HEADER_SIZE])?;
            (header, HeaderSource::Header { offset: idx }, idx + HEADER_SIZE)
        }
        None => {
            let (off, channels) =
                headerless_alignment(buf).ok_or_else(|| DecodeError::undecodable(buf))?;
            tracing::warn!(
                offset = off,
                channels,
                len = buf.len(),
                "no ACCLOG header, decoding as raw samples with default settings"
            );
            (
                LogHeader::synthesized(channels),
                HeaderSource::Synthesized { offset: off },
                off,
            )
        }
    };

    let payload = &buf[payload_start..];
    let channels = header.channels();
    let sample_bytes = channels * 2;
    let whole = payload.len() / sample_bytes * sample_bytes;
    let dropped_bytes = payload.len() - whole;
    if dropped_bytes > 0 {
        tracing::debug!(dropped_bytes, "dropping trailing partial sample");
    }

    let lsb_per_g = header.lsb_per_g();
    let odr = f64::from(header.odr_hz);
    let samples = payload[..whole]
        .chunks_exact(sample_bytes)
        .enumerate()
        .map(|(i, row)| {
            let ch = |c: usize| f64::from(BigEndian::read_i16(&row[c * 2..c * 2 + 2]));
            Sample {
                index: i as u64,
                t_sec: i as f64 / odr,
                accel_g: [ch(0) / lsb_per_g, ch(1) / lsb_per_g, ch(2) / lsb_per_g],
                gyro_dps: (channels == 6).then(|| [ch(3), ch(4), ch(5)]),
            }
        })
        .collect();

    Ok(DecodedLog {
        header,
        source,
        samples: SampleStream { samples },
        dropped_bytes,
    })
}

/// Read and decode a file
pub fn decode_file<P: AsRef<Path>>(path: P) -> Result<DecodedLog, DecodeError> {
    let buf = std::fs::read(path)?;
    decode(&buf)
}
