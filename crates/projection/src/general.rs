//! PROJ-string projections evaluated with proj4rs.
//!
//! Covers every projected system without a hand-written implementation
//! (Albers, transverse mercator, UTM, ...). Each projection is paired with
//! a lon/lat system on the same ellipsoid and datum, so moving between the
//! two never applies a datum shift.

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use std::fmt;

use crate::error::{ProjectionError, ProjectionResult};

/// PROJ keys that describe the ellipsoid or datum rather than the projection.
const GEODETIC_KEYS: &[&str] = &["a", "b", "rf", "f", "R", "ellps", "datum", "towgs84"];

pub struct GeneralProjection {
    definition: String,
    projected: Proj,
    geodetic: Proj,
}

impl GeneralProjection {
    pub fn new(definition: &str) -> ProjectionResult<Self> {
        let projected = Proj::from_proj_string(definition).map_err(|e| {
            ProjectionError::InvalidParameters(format!("'{}': {:?}", definition, e))
        })?;

        let geodetic_definition = geodetic_twin(definition);
        let geodetic = Proj::from_proj_string(&geodetic_definition).map_err(|e| {
            ProjectionError::InvalidParameters(format!("'{}': {:?}", geodetic_definition, e))
        })?;

        Ok(Self {
            definition: definition.to_string(),
            projected,
            geodetic,
        })
    }

    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// Geographic (lon, lat) degrees to projected (x, y).
    pub fn geo_to_xy(&self, lon_deg: f64, lat_deg: f64) -> ProjectionResult<(f64, f64)> {
        let mut point = (lon_deg.to_radians(), lat_deg.to_radians(), 0.0);
        transform(&self.geodetic, &self.projected, &mut point).map_err(|e| {
            ProjectionError::TransformFailed(format!("({}, {}) into {}: {:?}", lon_deg, lat_deg, self.definition, e))
        })?;
        Ok((point.0, point.1))
    }

    /// Projected (x, y) to geographic (lon, lat) degrees.
    pub fn xy_to_geo(&self, x: f64, y: f64) -> ProjectionResult<(f64, f64)> {
        let mut point = (x, y, 0.0);
        transform(&self.projected, &self.geodetic, &mut point).map_err(|e| {
            ProjectionError::TransformFailed(format!("({}, {}) out of {}: {:?}", x, y, self.definition, e))
        })?;
        Ok((point.0.to_degrees(), point.1.to_degrees()))
    }
}

impl fmt::Debug for GeneralProjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneralProjection")
            .field("definition", &self.definition)
            .finish()
    }
}

/// `+proj=longlat` with the ellipsoid and datum parameters of `definition`.
fn geodetic_twin(definition: &str) -> String {
    let mut twin = String::from("+proj=longlat");
    for token in definition.split_whitespace() {
        let key = token.trim_start_matches('+').split('=').next().unwrap_or_default();
        if GEODETIC_KEYS.contains(&key) {
            twin.push(' ');
            twin.push_str(token);
        }
    }
    twin.push_str(" +no_defs");
    twin
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONUS_ALBERS: &str = "+proj=aea +lat_0=23 +lon_0=-96 +lat_1=29.5 +lat_2=45.5 +x_0=0 +y_0=0 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs";

    #[test]
    fn test_geodetic_twin_keeps_datum() {
        assert_eq!(
            geodetic_twin(CONUS_ALBERS),
            "+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs"
        );
        assert_eq!(
            geodetic_twin("+proj=laea +lat_0=45 +a=6370997 +b=6370997"),
            "+proj=longlat +a=6370997 +b=6370997 +no_defs"
        );
    }

    #[test]
    fn test_albers_origin_and_central_meridian() {
        let albers = GeneralProjection::new(CONUS_ALBERS).unwrap();
        let (x, y) = albers.geo_to_xy(-96.0, 23.0).unwrap();
        assert!(x.abs() < 1e-6 && y.abs() < 1e-6, "origin maps to ({}, {})", x, y);

        let (x, y) = albers.geo_to_xy(-96.0, 40.0).unwrap();
        assert!(x.abs() < 1e-6);
        assert!(y > 1_800_000.0 && y < 2_000_000.0, "got {}", y);

        // symmetric about the central meridian
        let (east, _) = albers.geo_to_xy(-90.0, 40.0).unwrap();
        let (west, _) = albers.geo_to_xy(-102.0, 40.0).unwrap();
        assert!((east + west).abs() < 1e-6);
    }

    #[test]
    fn test_albers_roundtrip() {
        let albers = GeneralProjection::new(CONUS_ALBERS).unwrap();
        for (lon, lat) in [(-97.0, 40.0), (-120.5, 35.25), (-70.1, 44.9)] {
            let (x, y) = albers.geo_to_xy(lon, lat).unwrap();
            let (lon2, lat2) = albers.xy_to_geo(x, y).unwrap();
            assert!((lon - lon2).abs() < 1e-8, "lon {} vs {}", lon, lon2);
            assert!((lat - lat2).abs() < 1e-8, "lat {} vs {}", lat, lat2);
        }
    }

    #[test]
    fn test_rejects_unknown_projection() {
        assert!(matches!(
            GeneralProjection::new("+proj=nonesuch +ellps=GRS80"),
            Err(ProjectionError::InvalidParameters(_))
        ));
    }
}
