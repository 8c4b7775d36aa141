//! Errors returned by the replicated log.

use std::io;
use thiserror::Error;

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, WalError>;

/// Failures a replicated log can return.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// `propose` was called on a log in `Follower` role.
    #[error("propose called while not leader")]
    NotLeader,
    /// A record failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(String),
    /// A record's CRC did not match its payload; the segment is truncated
    /// at the last valid record rather than treated as fully corrupt.
    #[error("checksum mismatch at offset {offset}")]
    Corrupt {
        /// Byte offset of the corrupt record.
        offset: u64,
    },
    /// The segment header's magic bytes or version did not match.
    #[error("invalid segment header: {0}")]
    InvalidHeader(String),
}
