//! Error type returned by every fallible store operation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed index specification or unusable data directory.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The data directory was written by a format this build cannot read.
    #[error("incompatible store format version {found} (minimum supported is {minimum})")]
    IncompatibleFormat { found: u32, minimum: u32 },
    #[error(transparent)]
    Storage(#[from] recfile::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
    /// A stored term could not be decoded.
    #[error("value {id} is corrupt: {reason}")]
    CorruptValue { id: i32, reason: String },
    #[error("invalid term: {0}")]
    InvalidTerm(String),
    /// A lock could not be acquired (already held, or the wait timed out).
    #[error("could not acquire {0}")]
    LockAcquisition(&'static str),
}

pub type Result<T> = std::result::Result<T, StoreError>;
