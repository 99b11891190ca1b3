//! Zonal statistics over forcing grids.
//!
//! The stages run in order, each consuming the previous one's output:
//!
//! 1. [`ZoneSet`] loads zone polygons from GeoJSON.
//! 2. [`Harmonizer`] settles the raster CRS and builds the [`SpatialGrid`](forcing_common::SpatialGrid),
//!    then reprojects the zones onto it.
//! 3. [`rasterize`] burns zones into a [`ZoneLayer`].
//! 4. [`aggregate`] reduces a raster slice to per-zone means ([`ZonalSeries`]).
//! 5. [`fill_gaps`] synthesizes series for zones no cell landed in.

pub mod aggregate;
pub mod error;
pub mod gap_fill;
pub mod harmonize;
pub mod rasterize;
pub mod zones;

pub use aggregate::{aggregate, ZonalSeries};
pub use error::{Result, ZonalError};
pub use gap_fill::{fill_gaps, GapFill, NEUTRAL_VALUE};
pub use harmonize::{CrsSource, HarmonizeOptions, Harmonized, Harmonizer, DEFAULT_CRS_KEYS};
pub use rasterize::{rasterize, CellAssignment, ZoneLayer, UNASSIGNED};
pub use zones::{Zone, ZoneSet};
