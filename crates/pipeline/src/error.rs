//! Error taxonomy of a collection run.

use thiserror::Error;

use grid_processor::GridProcessorError;
use zonal::ZonalError;

/// Errors surfaced by the pipeline.
///
/// Everything except [`ForcingError::PartitionFailure`] is raised before
/// partition work starts and ends the run.
#[derive(Error, Debug)]
pub enum ForcingError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("no data between {start} and {end}")]
    EmptyRange { start: String, end: String },

    #[error("unresolvable CRS: {0}")]
    UnresolvableCrs(String),

    #[error("empty intersection: {0}")]
    EmptyIntersection(String),

    #[error("partition {partition} failed: {cause}")]
    PartitionFailure { partition: usize, cause: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid zones: {0}")]
    Zones(String),

    #[error("invalid catalog descriptor: {0}")]
    Descriptor(String),

    #[error("output error: {0}")]
    Output(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForcingError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn output(msg: impl Into<String>) -> Self {
        Self::Output(msg.into())
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, ForcingError::PartitionFailure { .. })
    }
}

impl From<GridProcessorError> for ForcingError {
    fn from(err: GridProcessorError) -> Self {
        match err {
            GridProcessorError::SourceUnavailable(msg) | GridProcessorError::ReadFailed(msg) => {
                ForcingError::SourceUnavailable(msg)
            }
            GridProcessorError::EmptyRange { start, end } => ForcingError::EmptyRange { start, end },
            GridProcessorError::ConfigError(msg) => ForcingError::Config(msg),
            other @ (GridProcessorError::InvalidDescriptor { .. }
            | GridProcessorError::InconsistentFragment { .. }
            | GridProcessorError::DuplicateTimestamp(_)
            | GridProcessorError::DecompressionError(_)
            | GridProcessorError::Unsupported(_)) => ForcingError::Descriptor(other.to_string()),
        }
    }
}

impl From<ZonalError> for ForcingError {
    fn from(err: ZonalError) -> Self {
        match err {
            ZonalError::UnresolvableCrs(msg) => ForcingError::UnresolvableCrs(msg),
            other @ (ZonalError::CrsMismatch { .. } | ZonalError::Projection(_)) => {
                ForcingError::UnresolvableCrs(other.to_string())
            }
            other @ ZonalError::EmptyIntersection { .. } => {
                ForcingError::EmptyIntersection(other.to_string())
            }
            ZonalError::InvalidZones(msg) => ForcingError::Zones(msg),
            other @ (ZonalError::UndefinedGridAxes(_) | ZonalError::Common(_)) => {
                ForcingError::Config(other.to_string())
            }
            ZonalError::InconsistentSeries(msg) => ForcingError::Output(msg),
            ZonalError::Io(e) => ForcingError::Io(e),
        }
    }
}

impl From<csv::Error> for ForcingError {
    fn from(err: csv::Error) -> Self {
        ForcingError::Output(err.to_string())
    }
}

impl From<serde_json::Error> for ForcingError {
    fn from(err: serde_json::Error) -> Self {
        ForcingError::Output(err.to_string())
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, ForcingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_mapping() {
        let e: ForcingError = GridProcessorError::EmptyRange {
            start: "a".into(),
            end: "b".into(),
        }
        .into();
        assert!(matches!(e, ForcingError::EmptyRange { .. }));

        let e: ForcingError = ZonalError::UnresolvableCrs("x".into()).into();
        assert!(matches!(e, ForcingError::UnresolvableCrs(_)));

        let e: ForcingError = ZonalError::EmptyIntersection {
            zones: 2,
            extent: "..".into(),
        }
        .into();
        assert!(matches!(e, ForcingError::EmptyIntersection(_)));
        assert!(e.is_fatal());

        let e = ForcingError::PartitionFailure {
            partition: 3,
            cause: "boom".into(),
        };
        assert!(!e.is_fatal());
        assert_eq!(e.to_string(), "partition 3 failed: boom");
    }
}
