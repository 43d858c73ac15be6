//! Decode errors

use thiserror::Error;

/// Errors that can occur while decoding a captured log
#[derive(Error, Debug)]
pub enum DecodeError {
    /// No magic and no length that fits whole samples
    #[error("Undecodable file: no ACCLOG header and no usable sample alignment (len={len} preview={preview})")]
    UndecodableFile {
        /// Buffer length
        len: usize,
        /// First 32 bytes, hex encoded
        preview: String,
    },

    /// Magic found but the header is short or carries unusable values
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// Reading the input or writing the CSV failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DecodeError {
    pub(crate) fn undecodable(buf: &[u8]) -> Self {
        DecodeError::UndecodableFile {
            len: buf.len(),
            preview: hex::encode(&buf[..buf.len().min(32)]),
        }
    }
}
