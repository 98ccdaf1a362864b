//! Error types

use std::path::PathBuf;

use thiserror::Error;

/// UFT protocol error type
///
/// Codec errors are fatal to the one datagram, stream errors are fatal to
/// their stream only; neither terminates the receive loop.
#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("truncated input: expected at least {expected} bytes, got {got}")]
    TruncatedInput { expected: usize, got: usize },

    #[error("unknown packet type: {0:#04x}")]
    UnknownPacketType(u8),

    #[error("destination already exists: {0}")]
    DestinationExists(PathBuf),

    #[error("no suitable destination filename found")]
    NoSuitableName,

    #[error("reorder buffer full: limit {limit} packets")]
    BufferFull { limit: usize },

    #[error("integrity check failed: expected {expected:02x?}, got {actual:02x?}")]
    IntegrityMismatch {
        expected: [u8; 16],
        actual: [u8; 16],
    },

    #[error("no stream ids available")]
    NoStreamsAvailable,

    #[error("packet size {size} exceeds limit {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
