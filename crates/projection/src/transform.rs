//! Transforms between two CRS definitions.

use std::sync::Arc;

use forcing_common::CrsDefinition;

use crate::error::ProjectionResult;
use crate::general::GeneralProjection;
use crate::lambert::LambertConformal;

/// One side of a transform: how a CRS maps to and from lon/lat degrees.
#[derive(Debug, Clone)]
pub enum Leg {
    Geographic,
    Lambert(LambertConformal),
    General(Arc<GeneralProjection>),
}

impl Leg {
    pub fn new(crs: &CrsDefinition) -> ProjectionResult<Self> {
        Ok(match crs {
            CrsDefinition::Geographic { .. } => Leg::Geographic,
            CrsDefinition::LambertConformalConic(p) => Leg::Lambert(LambertConformal::new(p)?),
            CrsDefinition::Projected { proj } => Leg::General(Arc::new(GeneralProjection::new(proj)?)),
        })
    }

    fn to_geo(&self, x: f64, y: f64) -> ProjectionResult<(f64, f64)> {
        match self {
            Leg::Geographic => Ok((x, y)),
            Leg::Lambert(proj) => Ok(proj.xy_to_geo(x, y)),
            Leg::General(proj) => proj.xy_to_geo(x, y),
        }
    }

    fn from_geo(&self, lon: f64, lat: f64) -> ProjectionResult<(f64, f64)> {
        match self {
            Leg::Geographic => Ok((lon, lat)),
            Leg::Lambert(proj) => Ok(proj.geo_to_xy(lon, lat)),
            Leg::General(proj) => proj.geo_to_xy(lon, lat),
        }
    }
}

/// A point transform from a source CRS to a target CRS.
///
/// Equal definitions yield [`CoordinateTransform::Identity`], which returns
/// coordinates bit-for-bit unchanged. Anything else goes through lon/lat
/// degrees. Geographic systems are treated as interchangeable (no datum
/// shift).
#[derive(Debug, Clone)]
pub enum CoordinateTransform {
    Identity,
    Pipeline { source: Leg, target: Leg },
}

impl CoordinateTransform {
    pub fn between(source: &CrsDefinition, target: &CrsDefinition) -> ProjectionResult<Self> {
        if source.approx_eq(target) {
            return Ok(CoordinateTransform::Identity);
        }
        Ok(CoordinateTransform::Pipeline {
            source: Leg::new(source)?,
            target: Leg::new(target)?,
        })
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, CoordinateTransform::Identity)
    }

    pub fn apply(&self, x: f64, y: f64) -> ProjectionResult<(f64, f64)> {
        match self {
            CoordinateTransform::Identity => Ok((x, y)),
            CoordinateTransform::Pipeline { source, target } => {
                let (lon, lat) = source.to_geo(x, y)?;
                target.from_geo(lon, lat)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forcing_common::Ellipsoid;

    #[test]
    fn test_identity_is_exact() {
        let t = CoordinateTransform::between(&CrsDefinition::nwm_lambert(), &CrsDefinition::nwm_lambert()).unwrap();
        assert!(t.is_identity());
        let p = (1234.567_891_234, -98_765.432_1);
        assert_eq!(t.apply(p.0, p.1).unwrap(), p);

        let nad83 = CrsDefinition::from_epsg(4269).unwrap();
        assert!(CoordinateTransform::between(&CrsDefinition::wgs84(), &nad83).unwrap().is_identity());

        let albers = CrsDefinition::from_epsg(5070).unwrap();
        assert!(CoordinateTransform::between(&albers, &CrsDefinition::from_epsg(6350).unwrap())
            .unwrap()
            .is_identity());
    }

    #[test]
    fn test_reproject_false_easting_shift() {
        let base = CrsDefinition::nwm_lambert();
        let shifted = match &base {
            CrsDefinition::LambertConformalConic(p) => {
                let mut p = *p;
                p.false_easting = 1000.0;
                p.ellipsoid = Ellipsoid::sphere(6_370_000.0);
                CrsDefinition::LambertConformalConic(p)
            }
            _ => unreachable!(),
        };
        let t = CoordinateTransform::between(&base, &shifted).unwrap();
        let (x, y) = t.apply(25_000.0, -40_000.0).unwrap();
        assert!((x - 26_000.0).abs() < 1e-6);
        assert!((y - -40_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_geographic_to_lambert_and_back() {
        let forward = CoordinateTransform::between(&CrsDefinition::wgs84(), &CrsDefinition::nwm_lambert()).unwrap();
        let inverse = CoordinateTransform::between(&CrsDefinition::nwm_lambert(), &CrsDefinition::wgs84()).unwrap();
        let (x, y) = forward.apply(-105.0, 39.5).unwrap();
        let (lon, lat) = inverse.apply(x, y).unwrap();
        assert!((lon + 105.0).abs() < 1e-9 && (lat - 39.5).abs() < 1e-9);
    }

    #[test]
    fn test_albers_to_lambert_matches_two_steps() {
        let albers = CrsDefinition::from_epsg(5070).unwrap();
        let direct = CoordinateTransform::between(&albers, &CrsDefinition::nwm_lambert()).unwrap();
        let to_geo = CoordinateTransform::between(&albers, &CrsDefinition::wgs84()).unwrap();
        let to_lcc = CoordinateTransform::between(&CrsDefinition::wgs84(), &CrsDefinition::nwm_lambert()).unwrap();

        let (x, y) = (-10_000.0, 1_900_000.0);
        let (lon, lat) = to_geo.apply(x, y).unwrap();
        assert!(lon < -96.0 && lon > -96.5, "lon {}", lon);
        assert!(lat > 38.0 && lat < 42.0, "lat {}", lat);

        let expected = to_lcc.apply(lon, lat).unwrap();
        let got = direct.apply(x, y).unwrap();
        assert!((got.0 - expected.0).abs() < 1e-6 && (got.1 - expected.1).abs() < 1e-6);
    }
}
