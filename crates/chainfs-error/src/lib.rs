#![forbid(unsafe_code)]
//! Error types for chainfs.
//!
//! Defines `ChainFsError` and a `Result<T>` alias used throughout the
//! workspace. Every engine operation fails with exactly one of these kinds.

use chainfs_types::ParseError;
use thiserror::Error;

/// Unified error type for all chainfs operations.
#[derive(Debug, Error)]
pub enum ChainFsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("no free inode slot left")]
    OutOfInodes,

    #[error("no free data block left")]
    OutOfBlocks,

    #[error("corrupt state: {0}")]
    Corrupt(String),

    #[error("invalid on-disk format: {0}")]
    Format(String),
}

impl From<ParseError> for ChainFsError {
    fn from(err: ParseError) -> Self {
        Self::Format(err.to_string())
    }
}

/// Result alias using `ChainFsError`.
pub type Result<T> = std::result::Result<T, ChainFsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_surface_as_format() {
        let parse = ParseError::InvalidField {
            field: "occupied",
            reason: "exceeds block payload",
        };
        let err: ChainFsError = parse.into();
        assert!(matches!(err, ChainFsError::Format(_)));
        assert!(err.to_string().contains("occupied"));
    }
}
