//! Geographic zones over a Lambert forcing grid.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{TimeZone, Utc};
use forcing_common::{CellWindow, CrsDefinition, RasterMetadata, RasterSlice, NWM_LAMBERT_PROJ};
use projection::{CoordinateTransform, LambertConformal};
use test_utils::{square_zones_geojson, write_zones_file, NWM_ESRI_PE_STRING};
use zonal::{aggregate, fill_gaps, rasterize, CellAssignment, CrsSource, HarmonizeOptions, Harmonizer, ZoneSet};

/// 5x5 cells of 1 km centred on the projection origin.
fn nwm_raster(attrs: &[(&str, &str)]) -> RasterMetadata {
    RasterMetadata {
        shape: (5, 5),
        crs_attributes: attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
        x: Some(vec![-2000.0, -1000.0, 0.0, 1000.0, 2000.0]),
        y: Some(vec![2000.0, 1000.0, 0.0, -1000.0, -2000.0]),
    }
}

/// Geographic quadrilateral whose corners project to (+-half, +-half).
fn geographic_square(id: &str, half: f64) -> String {
    let lcc = match CrsDefinition::nwm_lambert() {
        CrsDefinition::LambertConformalConic(p) => LambertConformal::new(&p).unwrap(),
        _ => unreachable!(),
    };
    let corner = |x: f64, y: f64| {
        let (lon, lat) = lcc.xy_to_geo(x, y);
        format!("[{}, {}]", lon, lat)
    };
    format!(
        r#"{{"type": "FeatureCollection", "features": [{{"type": "Feature", "properties": {{"id": "{id}"}},
           "geometry": {{"type": "Polygon", "coordinates": [[{}, {}, {}, {}, {}]]}}}}]}}"#,
        corner(-half, -half),
        corner(half, -half),
        corner(half, half),
        corner(-half, half),
        corner(-half, -half),
    )
}

#[test]
fn test_geographic_zone_lands_on_lambert_cells() {
    let zones = ZoneSet::from_geojson(&geographic_square("cat-9", 1500.0), "id").unwrap();
    let harmonized = Harmonizer::default()
        .harmonize(&nwm_raster(&[("esri_pe_string", NWM_ESRI_PE_STRING)]), &zones)
        .unwrap();
    assert_eq!(harmonized.crs_source, CrsSource::Attribute("esri_pe_string".to_string()));

    let layer = rasterize(&harmonized.zones, &harmonized.grid, CellAssignment::Centroid).unwrap();
    assert_eq!(layer.window(), CellWindow::new(1, 4, 1, 4));
    assert_eq!(layer.zone_cells(0).len(), 9);
}

/// The same Lambert square expressed in NAD83 / Conus Albers.
fn albers_square(id: &str, half: f64) -> String {
    let to_albers =
        CoordinateTransform::between(&CrsDefinition::nwm_lambert(), &CrsDefinition::from_epsg(5070).unwrap()).unwrap();
    let corner = |x: f64, y: f64| {
        let (ax, ay) = to_albers.apply(x, y).unwrap();
        format!("[{}, {}]", ax, ay)
    };
    format!(
        r#"{{"type": "FeatureCollection",
           "crs": {{"type": "name", "properties": {{"name": "urn:ogc:def:crs:EPSG::5070"}}}},
           "features": [{{"type": "Feature", "properties": {{"divide_id": "{id}"}},
           "geometry": {{"type": "Polygon", "coordinates": [[{}, {}, {}, {}, {}]]}}}}]}}"#,
        corner(-half, -half),
        corner(half, -half),
        corner(half, half),
        corner(-half, half),
        corner(-half, -half),
    )
}

#[test]
fn test_albers_zone_file_lands_on_lambert_cells() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_zones_file(dir.path(), "divides.geojson", &albers_square("cat-12", 1500.0));
    let zones = ZoneSet::from_path(&path, "divide_id").unwrap();
    assert!(!zones.crs().is_geographic());

    let harmonized = Harmonizer::default()
        .harmonize(&nwm_raster(&[("esri_pe_string", NWM_ESRI_PE_STRING)]), &zones)
        .unwrap();
    assert!(harmonized.zones.crs().approx_eq(&CrsDefinition::nwm_lambert()));

    let layer = rasterize(&harmonized.zones, &harmonized.grid, CellAssignment::Centroid).unwrap();
    assert_eq!(layer.window(), CellWindow::new(1, 4, 1, 4));
    assert_eq!(layer.zone_cells(0).len(), 9);
}

#[test]
fn test_fallback_projection_for_raster_without_crs() {
    let zones = ZoneSet::from_geojson(&geographic_square("cat-9", 1500.0), "id").unwrap();

    assert!(Harmonizer::default().harmonize(&nwm_raster(&[]), &zones).is_err());

    let harmonizer = Harmonizer::new(HarmonizeOptions {
        fallback_projection: Some(NWM_LAMBERT_PROJ.to_string()),
        ..Default::default()
    });
    let harmonized = harmonizer.harmonize(&nwm_raster(&[]), &zones).unwrap();
    assert_eq!(harmonized.crs_source, CrsSource::Fallback);
    let layer = rasterize(&harmonized.zones, &harmonized.grid, CellAssignment::Centroid).unwrap();
    assert_eq!(layer.zone_cells(0).len(), 9);
}

#[test]
fn test_aggregate_and_gap_fill_share_schema() {
    let text = square_zones_geojson(&[("in", (-97.001, 39.99, -96.99, 40.01)), ("far", (10.0, 10.0, 11.0, 11.0))]);
    let zones = ZoneSet::from_geojson(&text, "id").unwrap();
    let harmonized = Harmonizer::default()
        .harmonize(&nwm_raster(&[("esri_pe_string", NWM_ESRI_PE_STRING)]), &zones)
        .unwrap();
    let layer = rasterize(&harmonized.zones, &harmonized.grid, CellAssignment::AllTouched).unwrap();

    let times = vec![
        Utc.with_ymd_and_hms(2012, 7, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2012, 7, 1, 1, 0, 0).unwrap(),
    ];
    let window = layer.window();
    let data = (0..times.len() * window.len()).map(|i| i as f32).collect();
    let slice = RasterSlice::new(times.clone(), window, vec!["T2D".to_string()], vec![data]).unwrap();

    let observed = aggregate(&slice, &layer).unwrap();
    assert!(observed.contains_zone("in"));
    assert!(!observed.contains_zone("far"));

    let covered: BTreeSet<String> = observed.zone_ids().map(str::to_string).collect();
    let fill = fill_gaps(&zones, &covered, observed.variables(), observed.times()).unwrap();
    assert_eq!(fill.zone_ids, vec!["far"]);
    assert_eq!(fill.series.times(), observed.times());
    assert_eq!(fill.series.zone("far").unwrap(), &[0.0, 0.0]);
}
