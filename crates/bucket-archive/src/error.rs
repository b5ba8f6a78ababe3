//! Error types for the flat-file archive store.

use bucket_core::CoverageError;
use thiserror::Error;

/// Result type alias for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("malformed {table} row: {reason}")]
    Parse { table: String, reason: String },

    #[error("encode error: {0}")]
    Encode(String),

    #[error("writer lock poisoned: {0}")]
    Poisoned(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Coverage(#[from] CoverageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    /// Report the error through the core readout boundary.
    pub fn into_coverage(self) -> CoverageError {
        match self {
            ArchiveError::Coverage(e) => e,
            ArchiveError::Io(e) => CoverageError::Io(e),
            other => CoverageError::Backend(other.to_string()),
        }
    }
}

/// Convert any `Display` error into an `ArchiveError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| $crate::error::ArchiveError::$variant(e.to_string())
    };
}

pub(crate) use map_err;
