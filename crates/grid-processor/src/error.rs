//! Error types for catalog resolution and chunk reads.

use thiserror::Error;

/// Errors that can occur while resolving a catalog or reading from it.
#[derive(Error, Debug)]
pub enum GridProcessorError {
    /// The catalog root or a descriptor could not be listed or fetched.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// No descriptor falls inside the requested range.
    #[error("no catalog entries between {start} and {end}")]
    EmptyRange { start: String, end: String },

    /// Malformed reference JSON or array metadata.
    #[error("invalid descriptor {descriptor}: {message}")]
    InvalidDescriptor { descriptor: String, message: String },

    /// A fragment's variable layout differs from the first fragment's.
    #[error("inconsistent fragment {descriptor}: {message}")]
    InconsistentFragment { descriptor: String, message: String },

    /// Two descriptors claim the same timestamp.
    #[error("duplicate timestamp {0}")]
    DuplicateTimestamp(String),

    /// Failed to read chunk bytes.
    #[error("failed to read grid data: {0}")]
    ReadFailed(String),

    /// Chunk bytes could not be decoded.
    #[error("decompression error: {0}")]
    DecompressionError(String),

    /// Codec, dtype or memory order this reader does not implement.
    #[error("unsupported encoding: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl GridProcessorError {
    pub fn source_unavailable(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable(msg.into())
    }

    pub fn invalid_descriptor(descriptor: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            descriptor: descriptor.into(),
            message: msg.into(),
        }
    }

    pub fn inconsistent_fragment(descriptor: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InconsistentFragment {
            descriptor: descriptor.into(),
            message: msg.into(),
        }
    }

    pub fn read_failed(msg: impl Into<String>) -> Self {
        Self::ReadFailed(msg.into())
    }

    pub fn decompression(msg: impl Into<String>) -> Self {
        Self::DecompressionError(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}

impl From<storage::StorageError> for GridProcessorError {
    fn from(err: storage::StorageError) -> Self {
        Self::ReadFailed(err.to_string())
    }
}

/// Result type for grid processor operations.
pub type Result<T> = std::result::Result<T, GridProcessorError>;
