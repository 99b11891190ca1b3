//! Error types for the shared data model.

use thiserror::Error;

/// Result type alias using CommonError.
pub type CommonResult<T> = Result<T, CommonError>;

#[derive(Debug, Error)]
pub enum CommonError {
    #[error("Invalid CRS definition: {0}")]
    InvalidCrs(String),

    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),

    #[error("Invalid grid: {0}")]
    InvalidGrid(String),

    #[error("Invalid time specification: {0}")]
    InvalidTime(String),

    #[error("Invalid raster slice: {0}")]
    InvalidSlice(String),
}

impl CommonError {
    pub fn invalid_crs(msg: impl Into<String>) -> Self {
        Self::InvalidCrs(msg.into())
    }

    pub fn invalid_grid(msg: impl Into<String>) -> Self {
        Self::InvalidGrid(msg.into())
    }

    pub fn invalid_time(msg: impl Into<String>) -> Self {
        Self::InvalidTime(msg.into())
    }
}
