//! Error types for starling.

use thiserror::Error;

/// Errors surfaced by the index core and its streaming driver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndexError {
    /// Tag already resolves to a live slot.
    #[error("tag {0} is already present")]
    DuplicateTag(u32),

    /// Tag does not resolve to a live slot.
    #[error("tag {0} is not present")]
    UnknownTag(u32),

    /// No free slot and the occupied range is exhausted.
    #[error("index is full ({capacity} slots)")]
    Capacity {
        /// Total user-addressable slots.
        capacity: usize,
    },

    /// Vector dimension differs from the index dimension.
    #[error("dimension mismatch: index has {expected} dimensions, vector has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Underlying I/O failure.
    #[error("io failure: {0}")]
    Io(String),

    /// Data file size disagrees with its header.
    #[error(
        "file size mismatch: actual {actual} bytes, expected {expected} \
         (npts = {npts}, dim = {dim})"
    )]
    FileSizeMismatch {
        actual: u64,
        expected: u64,
        npts: usize,
        dim: usize,
    },

    /// Rejected configuration or parameter value.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        IndexError::Io(err.to_string())
    }
}

/// Result type alias for starling operations.
pub type Result<T> = std::result::Result<T, IndexError>;
