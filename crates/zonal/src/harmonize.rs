//! Spatial reference harmonization.
//!
//! Decides the raster CRS from its own attributes, falling back to an
//! explicitly configured projection only when none of them parse, then
//! reprojects the zone set into that CRS.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, instrument, warn};

use forcing_common::{CrsDefinition, GridGeometry, RasterMetadata, SpatialGrid};

use crate::error::{Result, ZonalError};
use crate::zones::ZoneSet;

/// Raster attributes tried for a CRS, in this order.
pub const DEFAULT_CRS_KEYS: [&str; 4] = ["crs_wkt", "spatial_ref", "esri_pe_string", "proj4"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmonizeOptions {
    pub crs_keys: Vec<String>,
    /// Used only when no raster attribute yields a CRS.
    pub fallback_projection: Option<String>,
    /// Grid placement for rasters without coordinate arrays.
    pub grid_geometry: Option<GridGeometry>,
}

impl Default for HarmonizeOptions {
    fn default() -> Self {
        Self {
            crs_keys: DEFAULT_CRS_KEYS.iter().map(|k| k.to_string()).collect(),
            fallback_projection: None,
            grid_geometry: None,
        }
    }
}

/// Where the raster CRS came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "key", rename_all = "snake_case")]
pub enum CrsSource {
    Attribute(String),
    Fallback,
}

impl fmt::Display for CrsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrsSource::Attribute(key) => write!(f, "attribute {}", key),
            CrsSource::Fallback => write!(f, "fallback projection"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Harmonized {
    pub grid: SpatialGrid,
    pub zones: ZoneSet,
    pub crs_source: CrsSource,
}

#[derive(Debug, Clone, Default)]
pub struct Harmonizer {
    options: HarmonizeOptions,
}

impl Harmonizer {
    pub fn new(options: HarmonizeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &HarmonizeOptions {
        &self.options
    }

    /// The raster CRS. Depends only on `raster` and the options.
    pub fn resolve_crs(&self, raster: &RasterMetadata) -> Result<(CrsDefinition, CrsSource)> {
        for key in &self.options.crs_keys {
            let Some(value) = raster.crs_attributes.get(key) else {
                continue;
            };
            match CrsDefinition::parse(value) {
                Ok(crs) => return Ok((crs, CrsSource::Attribute(key.clone()))),
                Err(e) => warn!(key = %key, error = %e, "Ignoring unparseable CRS attribute"),
            }
        }

        let Some(fallback) = &self.options.fallback_projection else {
            return Err(ZonalError::UnresolvableCrs(format!(
                "none of {:?} parse and no fallback projection is configured",
                self.options.crs_keys
            )));
        };
        let crs = CrsDefinition::parse(fallback)
            .map_err(|e| ZonalError::UnresolvableCrs(format!("fallback projection: {}", e)))?;
        Ok((crs, CrsSource::Fallback))
    }

    /// Cell-centre axes from the raster, or from the configured geometry.
    pub fn spatial_grid(&self, raster: &RasterMetadata, crs: CrsDefinition) -> Result<SpatialGrid> {
        let (rows, cols) = raster.shape;
        match (&raster.x, &raster.y, &self.options.grid_geometry) {
            (Some(x), Some(y), _) => {
                if x.len() != cols || y.len() != rows {
                    return Err(ZonalError::UndefinedGridAxes(format!(
                        "axes {}x{} do not match grid {}x{}",
                        y.len(),
                        x.len(),
                        rows,
                        cols
                    )));
                }
                Ok(SpatialGrid::new(crs, x.clone(), y.clone())?)
            }
            (_, _, Some(geometry)) => Ok(SpatialGrid::from_geometry(crs, *geometry, raster.shape)?),
            _ => Err(ZonalError::UndefinedGridAxes(
                "raster has no x/y coordinates and no grid geometry is configured".to_string(),
            )),
        }
    }

    #[instrument(skip_all, fields(zones = zones.len(), shape = ?raster.shape))]
    pub fn harmonize(&self, raster: &RasterMetadata, zones: &ZoneSet) -> Result<Harmonized> {
        let (crs, crs_source) = self.resolve_crs(raster)?;
        info!(source = %crs_source, crs = %crs, "Resolved raster CRS");

        let grid = self.spatial_grid(raster, crs)?;
        debug!(extent = ?grid.extent(), dx = grid.dx(), dy = grid.dy(), "Built spatial grid");

        let zones = zones.reproject(grid.crs())?;
        Ok(Harmonized {
            grid,
            zones,
            crs_source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forcing_common::NWM_LAMBERT_PROJ;
    use std::collections::BTreeMap;
    use test_utils::{square_zones_geojson, NWM_ESRI_PE_STRING, WGS84_WKT};

    fn raster(attrs: &[(&str, &str)]) -> RasterMetadata {
        RasterMetadata {
            shape: (2, 3),
            crs_attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            x: Some(vec![0.5, 1.5, 2.5]),
            y: Some(vec![1.5, 0.5]),
        }
    }

    #[test]
    fn test_raster_attribute_beats_fallback() {
        let harmonizer = Harmonizer::new(HarmonizeOptions {
            fallback_projection: Some(NWM_LAMBERT_PROJ.to_string()),
            ..Default::default()
        });
        let (crs, source) = harmonizer
            .resolve_crs(&raster(&[("esri_pe_string", NWM_ESRI_PE_STRING)]))
            .unwrap();
        assert_eq!(source, CrsSource::Attribute("esri_pe_string".to_string()));
        assert!(crs.approx_eq(&CrsDefinition::nwm_lambert()));
    }

    #[test]
    fn test_key_order_and_unparseable_values() {
        let harmonizer = Harmonizer::default();
        let (crs, source) = harmonizer
            .resolve_crs(&raster(&[
                ("crs_wkt", "garbage"),
                ("esri_pe_string", NWM_ESRI_PE_STRING),
                ("spatial_ref", WGS84_WKT),
            ]))
            .unwrap();
        assert_eq!(source, CrsSource::Attribute("spatial_ref".to_string()));
        assert!(crs.is_geographic());
    }

    #[test]
    fn test_fallback_only_when_attributes_fail() {
        let harmonizer = Harmonizer::new(HarmonizeOptions {
            fallback_projection: Some(NWM_LAMBERT_PROJ.to_string()),
            ..Default::default()
        });
        let (crs, source) = harmonizer.resolve_crs(&raster(&[("crs_wkt", "garbage")])).unwrap();
        assert_eq!(source, CrsSource::Fallback);
        assert!(crs.approx_eq(&CrsDefinition::nwm_lambert()));

        let again = harmonizer.resolve_crs(&raster(&[("crs_wkt", "garbage")])).unwrap();
        assert_eq!(again.0, crs);
    }

    #[test]
    fn test_unresolvable() {
        let err = Harmonizer::default().resolve_crs(&raster(&[])).unwrap_err();
        assert!(matches!(err, ZonalError::UnresolvableCrs(_)));

        let bad_fallback = Harmonizer::new(HarmonizeOptions {
            fallback_projection: Some("+proj=merc".to_string()),
            ..Default::default()
        });
        assert!(matches!(
            bad_fallback.resolve_crs(&raster(&[])),
            Err(ZonalError::UnresolvableCrs(_))
        ));
    }

    #[test]
    fn test_grid_geometry_when_axes_missing() {
        let mut metadata = raster(&[("crs_wkt", WGS84_WKT)]);
        metadata.x = None;
        metadata.y = None;

        assert!(matches!(
            Harmonizer::default().harmonize(&metadata, &ZoneSet::new(CrsDefinition::wgs84(), vec![]).unwrap()),
            Err(ZonalError::UndefinedGridAxes(_))
        ));

        let harmonizer = Harmonizer::new(HarmonizeOptions {
            grid_geometry: Some(GridGeometry {
                x0: 0.5,
                y0: 1.5,
                dx: 1.0,
                dy: -1.0,
            }),
            ..Default::default()
        });
        let grid = harmonizer
            .spatial_grid(&metadata, CrsDefinition::wgs84())
            .unwrap();
        assert_eq!(grid.x(), &[0.5, 1.5, 2.5]);
        assert_eq!(grid.y(), &[1.5, 0.5]);
    }

    #[test]
    fn test_harmonize_same_crs_keeps_coordinates() {
        let zones = ZoneSet::from_geojson(&square_zones_geojson(&[("a", (0.0, 0.0, 2.0, 1.0))]), "id").unwrap();
        let harmonized = Harmonizer::default()
            .harmonize(&raster(&[("crs_wkt", WGS84_WKT)]), &zones)
            .unwrap();
        assert_eq!(harmonized.zones.zones(), zones.zones());
        assert_eq!(harmonized.grid.shape(), (2, 3));
    }
}
