//! Error types for the SQLite coverage store.

use bucket_core::CoverageError;
use thiserror::Error;

/// Result type alias for SQLite store operations.
pub type SqlResult<T> = Result<T, SqlError>;

/// Errors that can occur while reading, writing or merging SQLite stores.
#[derive(Debug, Error)]
pub enum SqlError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("attach error: {0}")]
    Attach(String),

    #[error("connection lock poisoned: {0}")]
    Poisoned(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Coverage(#[from] CoverageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert any `Display` error into a `SqlError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| $crate::error::SqlError::$variant(e.to_string())
    };
}

pub(crate) use map_err;
