//! Protocol error types

use thiserror::Error;

/// Errors that can occur while framing or decoding messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Length prefix is not a valid varint
    #[error("Malformed length prefix")]
    InvalidLengthPrefix,

    /// Frame exceeds maximum size
    #[error("Frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// Stream ended in the middle of a frame
    #[error("Stream closed before a complete frame was read")]
    UnexpectedEof,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
