//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the logger
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Another process holds the port open
    #[error("Serial port {port} is busy: {detail}. {hint}")]
    PortBusy {
        /// Port name as requested
        port: String,
        /// OS error text
        detail: String,
        /// What to try next
        hint: &'static str,
    },

    /// Open or line setup failed at the I/O layer, usually a device-reset race
    #[error("I/O error opening {port}: {detail}. {hint}")]
    PortIo {
        /// Port name as requested
        port: String,
        /// OS error text
        detail: String,
        /// What to try next
        hint: &'static str,
    },

    /// Open failed for any other reason
    #[error("Failed to open {port}: {detail}")]
    PortOpen {
        /// Port name as requested
        port: String,
        /// Error text from the serial layer
        detail: String,
    },

    /// The named port does not exist
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// No candidate baud produced a PONG
    #[error("No PONG from {port} at any baud rate (tried {tried:?})")]
    HandshakeFailed {
        /// Port name as requested
        port: String,
        /// Bauds that opened but stayed silent, in order
        tried: Vec<u32>,
    },

    /// The device sent something other than what the exchange allows
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A read ran out of time; the text names the step
    #[error("Timeout while {0}")]
    Timeout(&'static str),

    /// An INFO line looked like JSON but did not parse
    #[error("INFO response is not valid JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Link or file I/O failed mid-exchange
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// True for the failures that come from opening the port rather than from the device
    pub fn is_open_failure(&self) -> bool {
        matches!(
            self,
            ProtocolError::PortBusy { .. }
                | ProtocolError::PortIo { .. }
                | ProtocolError::PortOpen { .. }
                | ProtocolError::PortNotFound(_)
        )
    }
}
