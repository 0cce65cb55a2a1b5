//! Error types for the transaction log.

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use twophase_protocol::ProtocolError;

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur while writing or replaying the log.
#[derive(Debug, Error)]
pub enum LogError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the backend.
    #[error("read beyond end of log: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: usize,
        /// Current backend size.
        size: u64,
    },

    /// Another process holds the log file.
    #[error("log locked: {path:?} is held by another coordinator")]
    Locked {
        /// Path of the locked file.
        path: PathBuf,
    },

    /// The log contents are structurally invalid.
    #[error("log corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// A record's stored checksum does not match its contents.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the damaged record.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// A field does not fit the record format.
    #[error("log entry too large: {message}")]
    EntryTooLarge {
        /// Which field overflowed.
        message: String,
    },

    /// A protocol value failed to decode.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl LogError {
    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates an entry-too-large error.
    pub fn too_large(message: impl Into<String>) -> Self {
        Self::EntryTooLarge {
            message: message.into(),
        }
    }

    /// Returns true if the error indicates damaged log contents.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Corruption { .. } | Self::ChecksumMismatch { .. } | Self::Protocol(_)
        )
    }
}
