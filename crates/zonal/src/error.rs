//! Error types for zonal processing.

use thiserror::Error;

use forcing_common::CommonError;
use projection::ProjectionError;

#[derive(Error, Debug)]
pub enum ZonalError {
    /// The zone file is unreadable or malformed.
    #[error("invalid zone set: {0}")]
    InvalidZones(String),

    /// Neither raster attributes nor the fallback yield a CRS.
    #[error("unresolvable CRS: {0}")]
    UnresolvableCrs(String),

    /// The raster has no coordinate arrays and no grid geometry was configured.
    #[error("grid axes undefined: {0}")]
    UndefinedGridAxes(String),

    /// No grid cell was assigned to any zone.
    #[error("no grid cell intersects any of {zones} zones (grid extent {extent})")]
    EmptyIntersection { zones: usize, extent: String },

    /// Zones and grid are in different reference systems.
    #[error("zone CRS {zones} does not match grid CRS {grid}")]
    CrsMismatch { zones: String, grid: String },

    /// Series fragments that cannot be joined.
    #[error("inconsistent series: {0}")]
    InconsistentSeries(String),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ZonalError {
    pub fn invalid_zones(msg: impl Into<String>) -> Self {
        Self::InvalidZones(msg.into())
    }

    pub fn inconsistent_series(msg: impl Into<String>) -> Self {
        Self::InconsistentSeries(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ZonalError>;
