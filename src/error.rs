use std::path::PathBuf;

use thiserror::Error;

/// Main error type for termdex operations
#[derive(Error, Debug)]
pub enum TermdexError {
    #[error("id value {0} exceeds the 36-bit encodable range")]
    ValueTooLarge(u64),

    #[error("invalid id encoding: {0}")]
    InvalidEncoding(String),

    #[error("corrupt segment {path}: {reason}")]
    CorruptSegment { path: PathBuf, reason: String },

    #[error("segment is full")]
    SegmentFull,

    #[error("segment is closed")]
    SegmentClosed,

    #[error("destination buffer too small: need {needed}, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("invalid pattern at byte {pos}: {msg}")]
    PatternSyntax { pos: usize, msg: String },

    #[error("invalid option {key}: {value}")]
    InvalidOption { key: String, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for termdex operations
pub type Result<T> = std::result::Result<T, TermdexError>;

impl TermdexError {
    /// Check if this error is recovered internally by segment rotation
    pub fn is_rotation_recoverable(&self) -> bool {
        matches!(self, TermdexError::SegmentFull)
    }
}
