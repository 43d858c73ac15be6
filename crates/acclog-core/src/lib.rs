//! # AccLog Core Library
//!
//! Host-side core for ACCLOG motion-sensor loggers.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial link setup with retries, reset settling and baud negotiation
//! - The `PING`/`INFO`/`DUMP`/`HEAD` line protocol
//! - Bulk log retrieval with header resynchronization and progress events
//! - Decoding of v1 (accelerometer) and v2 (accelerometer + gyroscope) logs
//!
//! ## Example
//!
//! ```rust,ignore
//! use acclog_core::prelude::*;
//!
//! let config = LinkConfig::default();
//! let (mut link, baud) = negotiate(&SystemPorts, "/dev/ttyUSB0", &config)?;
//! let file = std::fs::File::create("ACCLOG.bin")?;
//! for event in DumpTransfer::new(&mut link, file, &config) {
//!     if let DumpEvent::Progress { done, total } = event? {
//!         println!("{done}/{total} at {baud} baud");
//!     }
//! }
//!
//! let log = decode_file("ACCLOG.bin")?;
//! println!("{} samples", log.samples.len());
//! ```

pub mod datalog;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::datalog::{
        convert_file, decode, decode_file, estimate_start_time, DecodeError, DecodedLog,
        HeaderSource, LogHeader, Sample, SampleStream,
    };
    pub use crate::protocol::{
        dump, dump_to_file, info, negotiate, DumpEvent, DumpSession, DumpTransfer, InfoRecord,
        LinkConfig, ProtocolError, SerialLink, SystemPorts,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
