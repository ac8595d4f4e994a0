//! Error types for log storage.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by log backends and the frame layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A complete frame failed its checksum.
    #[error("frame at offset {offset} is corrupted: {reason}")]
    CorruptFrame {
        /// Offset of the frame header.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// Truncation target lies beyond the end of the log.
    #[error("cannot truncate to {requested}, log is only {size} bytes")]
    TruncatePastEnd {
        /// Requested size.
        requested: u64,
        /// Current size.
        size: u64,
    },

    /// A frame payload is too large to be length-prefixed.
    #[error("frame payload of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),
}

impl StorageError {
    /// Creates a corrupt frame error.
    pub fn corrupt_frame(offset: u64, reason: impl Into<String>) -> Self {
        Self::CorruptFrame {
            offset,
            reason: reason.into(),
        }
    }
}
