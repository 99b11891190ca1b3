use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Backend(String),

    #[error("Invalid storage URL: {0}")]
    InvalidUrl(String),
}

impl StorageError {
    /// Map an `object_store` error, keeping not-found distinguishable.
    pub(crate) fn from_store(context: impl std::fmt::Display, err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StorageError::NotFound(path),
            other => StorageError::Backend(format!("{}: {}", context, other)),
        }
    }
}
