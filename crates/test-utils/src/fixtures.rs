//! Common test fixtures for forcing collector tests.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// WKT1 for WGS84 as GDAL writes it.
pub const WGS84_WKT: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563]],PRIMEM["Greenwich",0],UNIT["degree",0.0174532925199433]]"#;

/// `esri_pe_string` carried by the NWM LDASIN forcing files.
pub const NWM_ESRI_PE_STRING: &str = r#"PROJCS["Lambert_Conformal_Conic",GEOGCS["GCS_Sphere",DATUM["D_Sphere",SPHEROID["Sphere",6370000.0,0.0]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Lambert_Conformal_Conic_2SP"],PARAMETER["false_easting",0.0],PARAMETER["false_northing",0.0],PARAMETER["central_meridian",-97.0],PARAMETER["standard_parallel_1",30.0],PARAMETER["standard_parallel_2",60.0],PARAMETER["latitude_of_origin",40.0000076293945],UNIT["Meter",1.0]]"#;

/// A rectangular zone: id and (min_x, min_y, max_x, max_y).
pub type SquareZone<'a> = (&'a str, (f64, f64, f64, f64));

fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Value {
    json!([[
        [min_x, min_y],
        [max_x, min_y],
        [max_x, max_y],
        [min_x, max_y],
        [min_x, min_y]
    ]])
}

/// FeatureCollection of rectangles with an `id` property each.
pub fn square_zones_geojson(zones: &[SquareZone<'_>]) -> String {
    let features: Vec<Value> = zones
        .iter()
        .map(|(id, (min_x, min_y, max_x, max_y))| {
            json!({
                "type": "Feature",
                "properties": {"id": id},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": rectangle(*min_x, *min_y, *max_x, *max_y)
                }
            })
        })
        .collect();
    json!({"type": "FeatureCollection", "features": features}).to_string()
}

/// Same as [`square_zones_geojson`] with a legacy `crs` member naming
/// `EPSG:<code>`.
pub fn square_zones_geojson_with_crs(zones: &[SquareZone<'_>], epsg: u32) -> String {
    let mut collection: Value = match serde_json::from_str(&square_zones_geojson(zones)) {
        Ok(value) => value,
        Err(_) => return String::new(),
    };
    collection["crs"] = json!({
        "type": "name",
        "properties": {"name": format!("urn:ogc:def:crs:EPSG::{}", epsg)}
    });
    collection.to_string()
}

/// Write a zone file into `dir` and return its path.
pub fn write_zones_file(dir: &Path, name: &str, geojson: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, geojson).expect("write zone fixture");
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_zones_geojson_shape() {
        let geojson = square_zones_geojson(&[("cat-1", (0.0, 0.0, 2.0, 2.0))]);
        let value: Value = serde_json::from_str(&geojson).unwrap();
        assert_eq!(value["features"][0]["properties"]["id"], "cat-1");
        assert_eq!(value["features"][0]["geometry"]["coordinates"][0].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_crs_member() {
        let geojson = square_zones_geojson_with_crs(&[("a", (0.0, 0.0, 1.0, 1.0))], 4326);
        assert!(geojson.contains("EPSG::4326"));
    }
}
