//! Log Decoding
//!
//! Parses the binary `ACCLOG` files produced by the logger firmware and
//! exports them.

mod decoder;
mod error;
pub mod format;
pub mod header;
pub mod timebase;

pub use decoder::{decode, decode_file, find_magic, DecodedLog, HeaderSource, Sample, SampleStream};
pub use error::DecodeError;
pub use format::{convert_file, write_csv};
pub use header::{LogHeader, FORMAT_V1, FORMAT_V2, HEADER_SIZE, MAGIC, MAGIC_LEGACY};
pub use timebase::{estimate_start_time, StartBasis, StartEstimate};
