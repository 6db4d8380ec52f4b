//! Error types for HashKV
//!
//! Provides a unified error type for all operations, plus the
//! `{code, message}` pair each database handle keeps for its last call.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using HashKvError
pub type Result<T> = std::result::Result<T, HashKvError>;

/// Unified error type for HashKV operations
#[derive(Debug, Error)]
pub enum HashKvError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Structural Errors
    // -------------------------------------------------------------------------
    #[error("Corruption detected: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    NotFound,

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Database is closed")]
    Closed,

    #[error("Database file is locked by another handle: {}", .0.display())]
    Locked(PathBuf),

    // -------------------------------------------------------------------------
    // Cursor Errors
    // -------------------------------------------------------------------------
    #[error("Cursor has no current record")]
    Exhausted,

    #[error("Cursor invalidated by a mutation during iteration")]
    CursorInvalidated,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HashKvError {
    /// Stable code for this error kind
    pub fn code(&self) -> ErrorCode {
        match self {
            HashKvError::Io(_) => ErrorCode::Io,
            HashKvError::Corrupt(_) | HashKvError::Serialization(_) => ErrorCode::Corrupt,
            HashKvError::NotFound => ErrorCode::NotFound,
            HashKvError::Closed => ErrorCode::Closed,
            HashKvError::Locked(_) => ErrorCode::Locked,
            HashKvError::Exhausted => ErrorCode::Exhausted,
            HashKvError::CursorInvalidated => ErrorCode::Invalidated,
            HashKvError::Config(_) => ErrorCode::Config,
        }
    }

    /// True only for a missing key
    pub fn is_not_found(&self) -> bool {
        matches!(self, HashKvError::NotFound)
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        HashKvError::Corrupt(message.into())
    }
}

impl From<bincode::Error> for HashKvError {
    fn from(e: bincode::Error) -> Self {
        HashKvError::Serialization(e.to_string())
    }
}

/// Stable numeric error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    Success = 0,
    Io = 1,
    Corrupt = 2,
    NotFound = 3,
    Closed = 4,
    Exhausted = 5,
    Invalidated = 6,
    Locked = 7,
    Config = 8,
}

impl ErrorCode {
    /// Short human-readable name of the code
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::Success => "success",
            ErrorCode::Io => "I/O failure",
            ErrorCode::Corrupt => "corrupted database",
            ErrorCode::NotFound => "no record found",
            ErrorCode::Closed => "database closed",
            ErrorCode::Exhausted => "cursor exhausted",
            ErrorCode::Invalidated => "cursor invalidated",
            ErrorCode::Locked => "database locked",
            ErrorCode::Config => "invalid configuration",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of the most recent call on a handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorState {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorState {
    /// The state after a successful call
    pub fn success() -> Self {
        Self {
            code: ErrorCode::Success,
            message: ErrorCode::Success.name().to_string(),
        }
    }

    /// Capture the code and message of a failure
    pub fn from_error(error: &HashKvError) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == ErrorCode::Success
    }
}

impl Default for ErrorState {
    fn default() -> Self {
        Self::success()
    }
}
