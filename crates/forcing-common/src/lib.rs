//! Common types shared across the forcing collector crates.
//!
//! Everything here is plain data: CRS definitions and their parsers, the
//! spatial grid a raster lives on, time ranges and partitions over a
//! virtual time axis, and the in-memory slice a partition loads.

pub mod bbox;
pub mod crs;
pub mod error;
pub mod grid;
pub mod slice;
pub mod time;
mod wkt;

pub use bbox::BoundingBox;
pub use crs::{epsg_proj_string, CrsDefinition, Ellipsoid, LambertConformalParams, NWM_LAMBERT_PROJ};
pub use error::{CommonError, CommonResult};
pub use grid::{CellWindow, GridGeometry, RasterMetadata, SpatialGrid};
pub use slice::RasterSlice;
pub use time::{parse_datetime, parse_with_format, plan_partitions, TimePartition, TimeRange};
