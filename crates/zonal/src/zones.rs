//! Zone polygons loaded from GeoJSON.

use geo::{BoundingRect, Coord, MapCoords, MultiPolygon};
use geojson::{feature::Id, Feature, GeoJson};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use forcing_common::{BoundingBox, CrsDefinition};
use projection::CoordinateTransform;

use crate::error::{Result, ZonalError};

/// A named polygonal region, typically a catchment.
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub id: String,
    pub geometry: MultiPolygon<f64>,
}

impl Zone {
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.geometry
            .bounding_rect()
            .map(|r| BoundingBox::new(r.min().x, r.min().y, r.max().x, r.max().y))
    }
}

/// Ordered zones in one CRS, unique by id.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneSet {
    crs: CrsDefinition,
    zones: Vec<Zone>,
}

impl ZoneSet {
    pub fn new(crs: CrsDefinition, zones: Vec<Zone>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(zones.len());
        for zone in &zones {
            if !seen.insert(zone.id.as_str()) {
                return Err(ZonalError::invalid_zones(format!("duplicate zone id {}", zone.id)));
            }
        }
        Ok(Self { crs, zones })
    }

    /// Read a FeatureCollection.
    ///
    /// Zone ids come from the `id_property` property, falling back to the
    /// feature `id`. The CRS comes from a legacy `crs` member when present
    /// and is WGS84 otherwise. Only Polygon and MultiPolygon geometries are
    /// accepted.
    pub fn from_geojson(text: &str, id_property: &str) -> Result<Self> {
        let geojson: GeoJson = text
            .parse()
            .map_err(|e| ZonalError::invalid_zones(format!("failed to parse GeoJSON: {}", e)))?;

        let collection = match geojson {
            GeoJson::FeatureCollection(fc) => fc,
            GeoJson::Feature(_) | GeoJson::Geometry(_) => {
                return Err(ZonalError::invalid_zones("expected a FeatureCollection"))
            }
        };

        let crs = match collection.foreign_members.as_ref().and_then(|fm| fm.get("crs")) {
            Some(member) => crs_from_member(member)?,
            None => CrsDefinition::wgs84(),
        };

        let zones = collection
            .features
            .iter()
            .enumerate()
            .map(|(idx, feature)| zone_from_feature(feature, idx, id_property))
            .collect::<Result<Vec<_>>>()?;

        Self::new(crs, zones)
    }

    pub fn from_path(path: &Path, id_property: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ZonalError::invalid_zones(format!("{}: {}", path.display(), e)))?;
        let zones = Self::from_geojson(&text, id_property)?;
        info!(path = %path.display(), zones = zones.len(), "Loaded zone set");
        Ok(zones)
    }

    /// Replace the declared CRS without touching coordinates.
    pub fn with_crs(mut self, crs: CrsDefinition) -> Self {
        self.crs = crs;
        self
    }

    pub fn crs(&self) -> &CrsDefinition {
        &self.crs
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.zones.iter().map(|z| z.id.as_str())
    }

    pub fn get(&self, id: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.id == id)
    }

    /// The same zones expressed in `target`.
    pub fn reproject(&self, target: &CrsDefinition) -> Result<ZoneSet> {
        let transform = CoordinateTransform::between(&self.crs, target)?;
        if transform.is_identity() {
            debug!("Zone CRS already matches target");
            return Ok(ZoneSet {
                crs: target.clone(),
                zones: self.zones.clone(),
            });
        }

        let transform = &transform;
        let zones = self
            .zones
            .iter()
            .map(|zone| {
                let geometry = zone.geometry.try_map_coords(|c| {
                    transform.apply(c.x, c.y).map(|(x, y)| Coord { x, y })
                })?;
                Ok(Zone {
                    id: zone.id.clone(),
                    geometry,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ZoneSet {
            crs: target.clone(),
            zones,
        })
    }
}

fn zone_from_feature(feature: &Feature, idx: usize, id_property: &str) -> Result<Zone> {
    let id = feature
        .properties
        .as_ref()
        .and_then(|props| props.get(id_property))
        .and_then(id_text)
        .or_else(|| {
            feature.id.as_ref().map(|id| match id {
                Id::String(s) => s.clone(),
                Id::Number(n) => n.to_string(),
            })
        })
        .ok_or_else(|| {
            ZonalError::invalid_zones(format!("feature {} has no '{}' property or id", idx, id_property))
        })?;

    let geometry = feature
        .geometry
        .clone()
        .ok_or_else(|| ZonalError::invalid_zones(format!("zone {} has no geometry", id)))?;
    let geometry: geo::Geometry<f64> = geometry
        .try_into()
        .map_err(|e| ZonalError::invalid_zones(format!("zone {}: {}", id, e)))?;

    let geometry = match geometry {
        geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
        geo::Geometry::MultiPolygon(mp) => mp,
        _ => {
            return Err(ZonalError::invalid_zones(format!(
                "zone {} is not a polygon",
                id
            )))
        }
    };
    Ok(Zone { id, geometry })
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `{"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::5070"}}`
fn crs_from_member(member: &Value) -> Result<CrsDefinition> {
    let name = member
        .get("properties")
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| ZonalError::invalid_zones("crs member has no name"))?;

    Ok(CrsDefinition::parse(name)?)
}
