//! Output directory layout and CSV writers.
//!
//! ```text
//! {output_dir}/
//! ├── partitions/part-00000.csv   time, zone_id, <columns>
//! ├── forcing/<zone-id>.csv       time, <columns>
//! ├── synthetic_zones.csv         zone_id
//! └── run_summary.json
//! ```

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use csv::{ReaderBuilder, StringRecord, Writer};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use zonal::ZonalSeries;

use crate::config::OutputLayout;
use crate::error::{ForcingError, Result};
use crate::outcome::RunSummary;

/// Timestamp format of every CSV written here.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const COMBINED_FILE: &str = "forcing.csv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    root: PathBuf,
}

impl OutputPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory tree.
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(self.partitions_dir())?;
        fs::create_dir_all(self.forcing_dir())?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partitions_dir(&self) -> PathBuf {
        self.root.join("partitions")
    }

    pub fn fragment(&self, partition: usize) -> PathBuf {
        self.partitions_dir().join(format!("part-{:05}.csv", partition))
    }

    pub fn forcing_dir(&self) -> PathBuf {
        self.root.join("forcing")
    }

    pub fn zone_file(&self, zone: &str) -> PathBuf {
        self.forcing_dir().join(format!("{}.csv", file_stem(zone)))
    }

    pub fn combined_file(&self) -> PathBuf {
        self.forcing_dir().join(COMBINED_FILE)
    }

    pub fn synthetic_manifest(&self) -> PathBuf {
        self.root.join("synthetic_zones.csv")
    }

    pub fn summary(&self) -> PathBuf {
        self.root.join("run_summary.json")
    }
}

/// Fail when two zone ids map to the same per-zone file.
///
/// Stems are compared case-insensitively so the layout also holds on
/// case-insensitive file systems.
pub fn check_zone_files<'a>(zone_ids: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for zone in zone_ids {
        let stem = file_stem(zone).to_lowercase();
        if let Some(other) = seen.insert(stem, zone) {
            return Err(ForcingError::output(format!(
                "zones '{}' and '{}' would both be written to {}.csv",
                other,
                zone,
                file_stem(zone)
            )));
        }
    }
    Ok(())
}

/// Zone id made safe for use as a file name.
fn file_stem(zone: &str) -> String {
    zone.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

fn format_time(t: &DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIME_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| ForcingError::output(format!("bad timestamp '{}': {}", s, e)))
}

fn format_value(v: f64, missing_fill: Option<f64>) -> String {
    match (v.is_nan(), missing_fill) {
        (true, Some(fill)) => fill.to_string(),
        _ => v.to_string(),
    }
}

/// Write one partition's series in long format. Returns the row count.
pub fn write_fragment(path: &Path, series: &ZonalSeries) -> Result<usize> {
    let mut wtr = Writer::from_path(path)?;

    let mut header = vec!["time".to_string(), "zone_id".to_string()];
    header.extend(series.variables().iter().cloned());
    wtr.write_record(&header)?;

    let mut rows = 0;
    for (t, time) in series.times().iter().enumerate() {
        let time = format_time(time);
        for zone in series.zone_ids() {
            let Some(row) = series.row(zone, t) else {
                continue;
            };
            let mut record = StringRecord::new();
            record.push_field(&time);
            record.push_field(zone);
            for &v in row {
                record.push_field(&format_value(v, None));
            }
            wtr.write_record(&record)?;
            rows += 1;
        }
    }
    wtr.flush()?;

    debug!(path = %path.display(), rows, "Wrote fragment");
    Ok(rows)
}

/// Read a fragment written by [`write_fragment`].
pub fn read_fragment(path: &Path) -> Result<ZonalSeries> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_path(path)?;

    let header = rdr.headers()?.clone();
    if header.get(0) != Some("time") || header.get(1) != Some("zone_id") {
        return Err(ForcingError::output(format!(
            "{}: expected time and zone_id leading columns",
            path.display()
        )));
    }
    let variables: Vec<String> = header.iter().skip(2).map(str::to_string).collect();
    let n = variables.len();

    let mut rows: BTreeMap<DateTime<Utc>, BTreeMap<String, Vec<f64>>> = BTreeMap::new();
    for record in rdr.records() {
        let record = record?;
        let (Some(time), Some(zone)) = (record.get(0), record.get(1)) else {
            return Err(ForcingError::output(format!("{}: short record", path.display())));
        };
        let values = record
            .iter()
            .skip(2)
            .map(|v| {
                v.parse::<f64>()
                    .map_err(|_| ForcingError::output(format!("{}: bad value '{}'", path.display(), v)))
            })
            .collect::<Result<Vec<f64>>>()?;
        if values.len() != n {
            return Err(ForcingError::output(format!(
                "{}: record has {} values, expected {}",
                path.display(),
                values.len(),
                n
            )));
        }
        rows.entry(parse_time(time)?)
            .or_default()
            .insert(zone.to_string(), values);
    }

    let times: Vec<DateTime<Utc>> = rows.keys().copied().collect();
    let mut zones: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (t, by_zone) in rows.values().enumerate() {
        for zone in by_zone.keys() {
            zones
                .entry(zone.clone())
                .or_insert_with(|| vec![f64::NAN; times.len() * n]);
        }
        for (zone, values) in zones.iter_mut() {
            if let Some(row) = by_zone.get(zone) {
                values[t * n..(t + 1) * n].copy_from_slice(row);
            }
        }
    }

    let mut series = ZonalSeries::new(variables, times);
    for (zone, values) in zones {
        series.insert(zone, values)?;
    }
    Ok(series)
}

/// Write the final per-zone forcing files. Returns the number of files.
pub fn write_zone_files(
    paths: &OutputPaths,
    series: &ZonalSeries,
    layout: OutputLayout,
    missing_fill: Option<f64>,
) -> Result<usize> {
    let files = match layout {
        OutputLayout::PerZone => {
            check_zone_files(series.zone_ids())?;
            for zone in series.zone_ids() {
                let mut wtr = Writer::from_path(paths.zone_file(zone))?;
                let mut header = vec!["time".to_string()];
                header.extend(series.variables().iter().cloned());
                wtr.write_record(&header)?;

                for (t, time) in series.times().iter().enumerate() {
                    let mut record = StringRecord::new();
                    record.push_field(&format_time(time));
                    for &v in series.row(zone, t).unwrap_or_default() {
                        record.push_field(&format_value(v, missing_fill));
                    }
                    wtr.write_record(&record)?;
                }
                wtr.flush()?;
            }
            series.zone_count()
        }
        OutputLayout::Combined => {
            let mut wtr = Writer::from_path(paths.combined_file())?;
            let mut header = vec!["time".to_string(), "zone_id".to_string()];
            header.extend(series.variables().iter().cloned());
            wtr.write_record(&header)?;

            for zone in series.zone_ids() {
                for (t, time) in series.times().iter().enumerate() {
                    let mut record = StringRecord::new();
                    record.push_field(&format_time(time));
                    record.push_field(zone);
                    for &v in series.row(zone, t).unwrap_or_default() {
                        record.push_field(&format_value(v, missing_fill));
                    }
                    wtr.write_record(&record)?;
                }
            }
            wtr.flush()?;
            1
        }
    };

    info!(files, zones = series.zone_count(), ?layout, "Wrote forcing files");
    Ok(files)
}

/// List the gap-filled zone ids.
pub fn write_synthetic_manifest(path: &Path, zone_ids: &[String]) -> Result<()> {
    let mut wtr = Writer::from_path(path)?;
    wtr.write_record(["zone_id"])?;
    for id in zone_ids {
        wtr.write_record([id])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(path, json)?;
    Ok(())
}
