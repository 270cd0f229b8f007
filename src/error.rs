//! Error types for BlockKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using BlockError
pub type Result<T> = std::result::Result<T, BlockError>;

/// Unified error type for BlockKV operations
#[derive(Debug, Error)]
pub enum BlockError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Format Errors
    // -------------------------------------------------------------------------
    /// Malformed record bytes (short buffer, bad magic, lengths past the end)
    #[error("Framing error: {0}")]
    Framing(String),

    /// The value log disagrees with the locator that points into it
    #[error("Corrupt index: {segment}@{offset} expected {expected} bytes, found {actual}")]
    CorruptIndex {
        segment: String,
        offset: u64,
        expected: u32,
        actual: u32,
    },

    // -------------------------------------------------------------------------
    // Compaction Errors
    // -------------------------------------------------------------------------
    #[error("Compaction error: {0}")]
    Compaction(String),

    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    KeyNotFound,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BlockError {
    /// True when the error is an I/O "file not found".
    ///
    /// The engine uses this to tell a segment removed by the compactor
    /// apart from a genuine read failure.
    pub fn is_missing_file(&self) -> bool {
        matches!(self, BlockError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}
