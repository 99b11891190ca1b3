//! Placeholder series for zones without data.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::info;

use crate::aggregate::ZonalSeries;
use crate::error::Result;
use crate::zones::ZoneSet;

/// Value every synthetic series carries.
pub const NEUTRAL_VALUE: f64 = 0.0;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GapFill {
    /// Synthesized zone ids, in zone-set order.
    pub zone_ids: Vec<String>,
    pub series: ZonalSeries,
}

impl GapFill {
    pub fn is_empty(&self) -> bool {
        self.zone_ids.is_empty()
    }
}

/// Synthesize a series for every zone of `zones` not in `covered`.
///
/// The series share `variables` and `times` with the observed ones and
/// hold [`NEUTRAL_VALUE`] everywhere.
pub fn fill_gaps(
    zones: &ZoneSet,
    covered: &BTreeSet<String>,
    variables: &[String],
    times: &[DateTime<Utc>],
) -> Result<GapFill> {
    let zone_ids: Vec<String> = zones
        .ids()
        .filter(|id| !covered.contains(*id))
        .map(str::to_string)
        .collect();

    let mut series = ZonalSeries::new(variables.to_vec(), times.to_vec());
    let len = variables.len() * times.len();
    for id in &zone_ids {
        series.insert(id.clone(), vec![NEUTRAL_VALUE; len])?;
    }

    if !zone_ids.is_empty() {
        info!(
            synthetic = zone_ids.len(),
            observed = covered.len(),
            "Gap-filled zones without coverage"
        );
    }
    Ok(GapFill { zone_ids, series })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_utils::square_zones_geojson;

    #[test]
    fn test_fills_only_uncovered_zones() {
        let zones = ZoneSet::from_geojson(
            &square_zones_geojson(&[
                ("z", (0.0, 0.0, 1.0, 1.0)),
                ("a", (1.0, 0.0, 2.0, 1.0)),
                ("m", (2.0, 0.0, 3.0, 1.0)),
            ]),
            "id",
        )
        .unwrap();
        let covered: BTreeSet<String> = ["a".to_string()].into_iter().collect();
        let times = vec![
            Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2019, 1, 1, 1, 0, 0).unwrap(),
        ];
        let variables = vec!["T2D".to_string(), "RAINRATE".to_string()];

        let fill = fill_gaps(&zones, &covered, &variables, &times).unwrap();

        assert_eq!(fill.zone_ids, vec!["z", "m"]);
        assert_eq!(fill.series.times(), times.as_slice());
        assert_eq!(fill.series.variables(), variables.as_slice());
        assert_eq!(fill.series.zone("m").unwrap(), &[0.0; 4]);
        assert!(!fill.series.contains_zone("a"));
    }

    #[test]
    fn test_nothing_to_fill() {
        let zones = ZoneSet::from_geojson(&square_zones_geojson(&[("a", (0.0, 0.0, 1.0, 1.0))]), "id").unwrap();
        let covered: BTreeSet<String> = ["a".to_string()].into_iter().collect();
        assert!(fill_gaps(&zones, &covered, &[], &[]).unwrap().is_empty());
    }
}
