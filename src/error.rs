use std::io;

use thiserror::Error;

/// Unified error type for the file engine, codec and store.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error from disk operations, including lock acquisition.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Data corruption detected (digest mismatch, truncated payload, bad header).
    #[error("Corruption: {0}")]
    Corruption(String),
    /// Operation not valid in the current lifecycle state (e.g. double open).
    #[error("Illegal state: {0}")]
    IllegalState(&'static str),
    /// Operation deliberately not provided (deferred commit, change listeners).
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
    /// A value the codec has no encoding for.
    #[error("Unsupported value: {0}")]
    UnsupportedValue(String),
}

impl Error {
    /// True for errors caused by damaged on-disk or encoded data.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
