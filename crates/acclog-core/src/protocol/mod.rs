//! Device Link Protocol
//!
//! Line-based command/response protocol spoken by the ACCLOG firmware over a
//! USB serial port: baud negotiation, the `PING` handshake, bulk `DUMP`
//! retrieval with header resynchronization, and `INFO` status queries.

pub mod commands;
mod connection;
pub mod control;
pub mod dump;
mod error;
pub mod info;
pub mod serial;

pub use commands::Command;
pub use connection::{negotiate, ping, with_link, LinkConfig, SerialLink};
pub use control::{control, head, regs, HeadPeek};
pub use dump::{dump, dump_to_file, DumpEvent, DumpSession, DumpTransfer, HeaderSync};
pub use error::ProtocolError;
pub use info::{info, query_info, InfoRecord};
pub use serial::{list_ports, open_link, Link, PortInfo, PortOpener, SystemPorts};

/// Baud rates tried by default, fastest first
pub const DEFAULT_BAUDS: [u32; 4] = [921_600, 460_800, 230_400, 115_200];

/// Default read timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
