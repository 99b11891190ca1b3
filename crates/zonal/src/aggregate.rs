//! Per-zone means over raster slices.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

use forcing_common::{CommonError, RasterSlice};

use crate::error::{Result, ZonalError};
use crate::rasterize::ZoneLayer;

/// Per-zone time series of per-variable values.
///
/// Each zone holds `times.len() * variables.len()` values, time-major:
/// `values[t * variables.len() + v]`. NaN marks an undefined mean.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ZonalSeries {
    variables: Vec<String>,
    times: Vec<DateTime<Utc>>,
    values: BTreeMap<String, Vec<f64>>,
}

impl ZonalSeries {
    pub fn new(variables: Vec<String>, times: Vec<DateTime<Utc>>) -> Self {
        Self {
            variables,
            times,
            values: BTreeMap::new(),
        }
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn times(&self) -> &[DateTime<Utc>] {
        &self.times
    }

    pub fn steps(&self) -> usize {
        self.times.len()
    }

    pub fn zone_count(&self) -> usize {
        self.values.len()
    }

    /// Zone ids in ascending order.
    pub fn zone_ids(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn contains_zone(&self, zone: &str) -> bool {
        self.values.contains_key(zone)
    }

    pub fn zone(&self, zone: &str) -> Option<&[f64]> {
        self.values.get(zone).map(Vec::as_slice)
    }

    /// Values of every variable at step `t`.
    pub fn row(&self, zone: &str, t: usize) -> Option<&[f64]> {
        let n = self.variables.len();
        self.values.get(zone).and_then(|v| v.get(t * n..(t + 1) * n))
    }

    pub fn value(&self, zone: &str, t: usize, variable: usize) -> Option<f64> {
        self.row(zone, t).and_then(|row| row.get(variable)).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn insert(&mut self, zone: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let zone = zone.into();
        let expected = self.times.len() * self.variables.len();
        if values.len() != expected {
            return Err(ZonalError::inconsistent_series(format!(
                "zone {} has {} values, expected {}",
                zone,
                values.len(),
                expected
            )));
        }
        self.values.insert(zone, values);
        Ok(())
    }

    /// Join partition fragments into one series.
    ///
    /// Fragments are ordered by their first timestamp, never by arrival.
    /// The result must have strictly increasing timestamps; overlapping or
    /// duplicate steps are an error. A zone missing from a fragment is NaN
    /// over that fragment's steps.
    pub fn concat(mut fragments: Vec<ZonalSeries>) -> Result<ZonalSeries> {
        fragments.retain(|f| !f.times.is_empty());
        fragments.sort_by_key(|f| f.times[0]);

        let Some(first) = fragments.first() else {
            return Ok(ZonalSeries::default());
        };
        let variables = first.variables.clone();
        let n = variables.len();

        let mut times: Vec<DateTime<Utc>> = Vec::new();
        for fragment in &fragments {
            if fragment.variables != variables {
                return Err(ZonalError::inconsistent_series(format!(
                    "variables {:?} differ from {:?}",
                    fragment.variables, variables
                )));
            }
            for &t in &fragment.times {
                if times.last().is_some_and(|last| *last >= t) {
                    return Err(ZonalError::inconsistent_series(format!(
                        "timestamp {} is not after the previous step",
                        t
                    )));
                }
                times.push(t);
            }
        }

        let mut values: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for zone in fragments.iter().flat_map(|f| f.values.keys()) {
            values
                .entry(zone.clone())
                .or_insert_with(|| Vec::with_capacity(times.len() * n));
        }
        for fragment in &fragments {
            for (zone, out) in values.iter_mut() {
                match fragment.values.get(zone) {
                    Some(v) => out.extend_from_slice(v),
                    None => out.extend(std::iter::repeat(f64::NAN).take(fragment.times.len() * n)),
                }
            }
        }

        Ok(ZonalSeries {
            variables,
            times,
            values,
        })
    }
}

/// Mean of each variable over each covered zone's cells, per time step.
///
/// NaN cells are left out of the mean; a zone with no defined cell at a
/// step gets NaN there. Zones without cells are absent from the result.
pub fn aggregate(slice: &RasterSlice, layer: &ZoneLayer) -> Result<ZonalSeries> {
    let cols = layer.shape().1;
    let window = slice.window;
    let mut series = ZonalSeries::new(slice.variables.clone(), slice.times.clone());

    for (zone, cells) in layer.covered() {
        let local = cells
            .iter()
            .map(|&flat| {
                window.local_index(flat / cols, flat % cols).ok_or_else(|| {
                    CommonError::InvalidSlice(format!(
                        "zone {} cell {} lies outside slice window {:?}",
                        zone, flat, window
                    ))
                })
            })
            .collect::<std::result::Result<Vec<usize>, CommonError>>()?;

        let mut values = Vec::with_capacity(slice.steps() * slice.variables.len());
        for t in 0..slice.steps() {
            for v in 0..slice.variables.len() {
                let data = slice.step(v, t);
                let (sum, count) = local
                    .iter()
                    .map(|&i| data[i])
                    .filter(|x| !x.is_nan())
                    .fold((0.0_f64, 0_usize), |(s, c), x| (s + x as f64, c + 1));
                values.push(if count == 0 { f64::NAN } else { sum / count as f64 });
            }
        }
        series.insert(zone, values)?;
    }

    debug!(zones = series.zone_count(), steps = series.steps(), "Aggregated slice");
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rasterize::{rasterize, CellAssignment};
    use crate::zones::ZoneSet;
    use chrono::{Duration, TimeZone};
    use forcing_common::{CellWindow, CrsDefinition, SpatialGrid};
    use test_utils::square_zones_geojson;

    fn hours(start: i64, n: usize) -> Vec<DateTime<Utc>> {
        let t0 = Utc.with_ymd_and_hms(2015, 6, 1, 0, 0, 0).unwrap();
        (0..n).map(|i| t0 + Duration::hours(start + i as i64)).collect()
    }

    /// Zone "a" on the four top-left cells, zone "b" on two cells of the
    /// bottom row, zone "c" outside the grid.
    fn layer() -> ZoneLayer {
        let grid = SpatialGrid::new(
            CrsDefinition::wgs84(),
            vec![0.5, 1.5, 2.5, 3.5],
            vec![3.5, 2.5, 1.5, 0.5],
        )
        .unwrap();
        let zones = ZoneSet::from_geojson(
            &square_zones_geojson(&[
                ("a", (0.0, 2.0, 2.0, 4.0)),
                ("b", (2.0, 0.0, 4.0, 1.0)),
                ("c", (20.0, 20.0, 21.0, 21.0)),
            ]),
            "id",
        )
        .unwrap();
        rasterize(&zones, &grid, CellAssignment::Centroid).unwrap()
    }

    fn slice(steps: &[[f32; 16]]) -> RasterSlice {
        let data = steps.iter().flatten().copied().collect();
        RasterSlice::new(
            hours(0, steps.len()),
            CellWindow::new(0, 4, 0, 4),
            vec!["T2D".to_string()],
            vec![data],
        )
        .unwrap()
    }

    #[rustfmt::skip]
    const STEP: [f32; 16] = [
        1.0, 2.0, 0.0, 0.0,
        3.0, 4.0, 0.0, 0.0,
        0.0, 0.0, 0.0, 0.0,
        0.0, 0.0, 10.0, 10.0,
    ];

    #[test]
    fn test_mean_of_cells_inside_each_zone() {
        let series = aggregate(&slice(&[STEP]), &layer()).unwrap();
        assert_eq!(series.value("a", 0, 0), Some(2.5));
        assert_eq!(series.value("b", 0, 0), Some(10.0));
        assert!(!series.contains_zone("c"));
    }

    #[test]
    fn test_nan_cells_are_excluded() {
        let mut step = STEP;
        step[0] = f32::NAN;
        let mut empty = STEP;
        empty[14] = f32::NAN;
        empty[15] = f32::NAN;

        let series = aggregate(&slice(&[step, empty]), &layer()).unwrap();
        assert_eq!(series.value("a", 0, 0), Some(3.0));
        assert!(series.value("b", 1, 0).unwrap().is_nan());
        assert_eq!(series.value("a", 1, 0), Some(2.5));
    }

    #[test]
    fn test_window_must_cover_zone_cells() {
        let s = RasterSlice::empty(hours(0, 1), CellWindow::new(0, 2, 0, 2), vec!["T2D".to_string()]);
        assert!(aggregate(&s, &layer()).is_err());
    }

    fn fragment(start: i64, n: usize, zone: &str) -> ZonalSeries {
        let mut s = ZonalSeries::new(vec!["T2D".to_string()], hours(start, n));
        s.insert(zone, (0..n).map(|i| (start + i as i64) as f64).collect()).unwrap();
        s
    }

    #[test]
    fn test_concat_sorts_by_time_not_arrival() {
        let joined = ZonalSeries::concat(vec![fragment(4, 2, "a"), fragment(0, 2, "a"), fragment(2, 2, "a")]).unwrap();
        assert_eq!(joined.times(), hours(0, 6).as_slice());
        assert_eq!(joined.zone("a").unwrap(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_concat_rejects_overlap_and_fills_missing_zones() {
        assert!(ZonalSeries::concat(vec![fragment(0, 3, "a"), fragment(2, 2, "a")]).is_err());

        let joined = ZonalSeries::concat(vec![fragment(0, 1, "a"), fragment(1, 1, "b")]).unwrap();
        assert_eq!(joined.zone("a").unwrap()[0], 0.0);
        assert!(joined.zone("a").unwrap()[1].is_nan());
        assert!(joined.zone("b").unwrap()[0].is_nan());
    }

    #[test]
    fn test_insert_checks_length() {
        let mut s = ZonalSeries::new(vec!["T2D".to_string(), "Q2D".to_string()], hours(0, 2));
        assert!(s.insert("a", vec![1.0; 3]).is_err());
        assert!(s.insert("a", vec![1.0; 4]).is_ok());
        assert_eq!(s.row("a", 1), Some(&[1.0, 1.0][..]));
    }
}
