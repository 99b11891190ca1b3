//! Coordinate reference system transformations.
//!
//! Lambert Conformal Conic, the projection of the forcing grids, is
//! implemented from scratch on a sphere or ellipsoid and serves as the fast
//! path. Every other projected system goes through proj4rs.

pub mod error;
pub mod general;
pub mod lambert;
pub mod transform;

pub use error::{ProjectionError, ProjectionResult};
pub use general::GeneralProjection;
pub use lambert::LambertConformal;
pub use transform::CoordinateTransform;
