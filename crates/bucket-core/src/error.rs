//! Error types for coverage encoding and merging.

use thiserror::Error;

/// Result type alias for coverage operations.
pub type CoverageResult<T> = Result<T, CoverageError>;

/// Errors that can occur while encoding, recording, reading or merging coverage.
#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("tried to merge coverage with different definition hashes: expected {expected}, found {found}")]
    IncompatibleDefinition { expected: String, found: String },

    #[error("tried to merge coverage with different record hashes: expected {expected}, found {found}")]
    IncompatibleContext { expected: String, found: String },

    #[error("no inputs to merge")]
    NoInputs,

    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("invalid axis {axis}: {reason}")]
    Axis { axis: String, reason: String },

    #[error("unrecognised value for axis '{axis}': {value}")]
    UnrecognisedValue { axis: String, value: String },

    #[error("invalid goal {goal}: {reason}")]
    Goal { goal: String, reason: String },

    #[error("invalid coverage tree: {0}")]
    Tree(String),

    #[error("bucket index: {0}")]
    Codec(String),

    #[error("illegal bucket '{point}.{goal}' hit: {values}")]
    IllegalBucket {
        point: String,
        goal: String,
        values: String,
    },

    #[error("hit count overflow in bucket {bucket}")]
    HitOverflow { bucket: usize },

    #[error("config error: {0}")]
    Config(String),

    #[error("worker failed: {0}")]
    Worker(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
