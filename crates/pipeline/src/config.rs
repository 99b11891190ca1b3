//! Run configuration.
//!
//! Loaded from YAML or from environment variables, then overridden by the
//! caller (the CLI) and checked with [`PipelineConfig::validate`].

use serde::{Deserialize, Deserializer, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use forcing_common::TimeRange;
use grid_processor::{ReaderConfig, ResolverConfig};
use storage::S3Options;
use zonal::{CellAssignment, HarmonizeOptions};

use crate::error::{ForcingError, Result};

/// One output column: `variable` times `scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub variable: String,
    #[serde(default = "unit_scale")]
    pub scale: f64,
}

fn unit_scale() -> f64 {
    1.0
}

impl ColumnSpec {
    pub fn new(name: &str, variable: &str, scale: f64) -> Self {
        Self {
            name: name.to_string(),
            variable: variable.to_string(),
            scale,
        }
    }
}

/// NextGen forcing column names.
pub fn default_columns() -> Vec<ColumnSpec> {
    vec![
        // mm s-1 to kg m-2 per hourly step
        ColumnSpec::new("APCP_surface", "RAINRATE", 3600.0),
        ColumnSpec::new("DLWRF_surface", "LWDOWN", 1.0),
        ColumnSpec::new("DSWRF_surface", "SWDOWN", 1.0),
        ColumnSpec::new("SPFH_2maboveground", "Q2D", 1.0),
        ColumnSpec::new("TMP_2maboveground", "T2D", 1.0),
        ColumnSpec::new("UGRD_10maboveground", "U2D", 1.0),
        ColumnSpec::new("VGRD_10maboveground", "V2D", 1.0),
        ColumnSpec::new("precip_rate", "RAINRATE", 1.0),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLayout {
    /// `forcing/<zone-id>.csv` per zone.
    #[default]
    PerZone,
    /// A single `forcing/forcing.csv` with a `zone_id` column.
    Combined,
}

impl std::str::FromStr for OutputLayout {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "per_zone" | "per-zone" | "zone" => Ok(Self::PerZone),
            "combined" | "single" => Ok(Self::Combined),
            other => Err(format!("unknown output layout '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Inclusive time range, any format `parse_datetime` accepts.
    pub start: String,
    pub end: String,

    pub catalog: ResolverConfig,
    pub reader: ReaderConfig,
    pub s3: S3Options,

    pub zones_path: PathBuf,
    /// Property holding the zone id.
    pub zone_id_property: String,
    /// Overrides the zone file's declared CRS.
    pub zones_crs: Option<String>,

    pub output_dir: PathBuf,
    pub output_layout: OutputLayout,
    pub columns: Vec<ColumnSpec>,
    /// Written in place of undefined means; `None` writes `NaN`.
    pub missing_fill: Option<f64>,

    pub workers: usize,
    /// Memory ceiling per worker, in bytes. YAML accepts `3GB` style sizes.
    #[serde(deserialize_with = "deserialize_memory")]
    pub memory_per_worker: u64,
    /// Target steps per partition, further capped by the memory ceiling.
    pub partition_size: Option<usize>,

    pub cell_assignment: CellAssignment,
    pub harmonize: HarmonizeOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            start: String::new(),
            end: String::new(),
            catalog: ResolverConfig::default(),
            reader: ReaderConfig::default(),
            s3: S3Options::default(),
            zones_path: PathBuf::new(),
            zone_id_property: "divide_id".to_string(),
            zones_crs: None,
            output_dir: PathBuf::from("./output"),
            output_layout: OutputLayout::default(),
            columns: default_columns(),
            missing_fill: Some(0.0),
            workers: 4,
            memory_per_worker: 3 * 1024 * 1024 * 1024,
            partition_size: None,
            cell_assignment: CellAssignment::default(),
            harmonize: HarmonizeOptions::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ForcingError::config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| ForcingError::config(format!("invalid YAML: {}", e)))
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self {
            catalog: ResolverConfig::from_env(),
            ..Default::default()
        };

        if let Ok(val) = env::var("FORCING_START") {
            config.start = val;
        }
        if let Ok(val) = env::var("FORCING_END") {
            config.end = val;
        }
        if let Ok(val) = env::var("ZONES_PATH") {
            config.zones_path = PathBuf::from(val);
        }
        if let Ok(val) = env::var("ZONE_ID_PROPERTY") {
            config.zone_id_property = val;
        }
        if let Ok(val) = env::var("OUTPUT_DIR") {
            config.output_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("OUTPUT_LAYOUT") {
            if let Ok(layout) = val.parse() {
                config.output_layout = layout;
            }
        }
        if let Ok(val) = env::var("WORKERS") {
            if let Ok(n) = val.parse() {
                config.workers = n;
            }
        }
        if let Ok(val) = env::var("MEMORY_PER_WORKER") {
            if let Ok(bytes) = parse_memory(&val) {
                config.memory_per_worker = bytes;
            }
        }
        if let Ok(val) = env::var("PARTITION_SIZE") {
            config.partition_size = val.parse().ok();
        }
        if let Ok(val) = env::var("CELL_ASSIGNMENT") {
            if let Ok(assignment) = val.parse() {
                config.cell_assignment = assignment;
            }
        }
        if let Ok(val) = env::var("FALLBACK_PROJECTION") {
            config.harmonize.fallback_projection = Some(val);
        }
        if let Ok(val) = env::var("S3_ENDPOINT") {
            config.s3.endpoint = Some(val);
        }
        if let Ok(val) = env::var("S3_REGION") {
            config.s3.region = val;
        }

        config
    }

    pub fn time_range(&self) -> Result<TimeRange> {
        TimeRange::parse(&self.start, &self.end).map_err(|e| ForcingError::config(e.to_string()))
    }

    /// Catalog variables the output columns read, in first-use order.
    pub fn column_variables(&self) -> Vec<String> {
        let mut variables: Vec<String> = Vec::new();
        for column in &self.columns {
            if !variables.contains(&column.variable) {
                variables.push(column.variable.clone());
            }
        }
        variables
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.catalog.validate()?;
        self.time_range().map_err(|e| e.to_string())?;

        if self.zones_path.as_os_str().is_empty() {
            return Err("zones_path must be set".to_string());
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err("output_dir must be set".to_string());
        }
        if self.workers == 0 {
            return Err("workers must be > 0".to_string());
        }
        if self.memory_per_worker == 0 {
            return Err("memory_per_worker must be > 0".to_string());
        }
        if self.partition_size == Some(0) {
            return Err("partition_size must be > 0".to_string());
        }
        if self.reader.read_concurrency == 0 {
            return Err("read_concurrency must be > 0".to_string());
        }
        if self.columns.is_empty() {
            return Err("at least one output column is required".to_string());
        }
        if let Some(missing) = self
            .column_variables()
            .into_iter()
            .find(|v| !self.catalog.variables.contains(v))
        {
            return Err(format!("column variable {} is not in catalog.variables", missing));
        }
        let mut names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err("output column names must be unique".to_string());
        }
        if names.iter().any(|n| *n == "time" || *n == "zone_id") {
            return Err("output columns may not be named time or zone_id".to_string());
        }

        Ok(())
    }
}

/// Parse `3GB`, `512MB`, `64KiB` or a plain byte count. Units are binary.
pub fn parse_memory(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let number: f64 = number
        .parse()
        .map_err(|_| format!("invalid memory size '{}'", s))?;

    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        "T" | "TB" | "TIB" => 1 << 40,
        other => return Err(format!("unknown memory unit '{}'", other)),
    };
    Ok((number * multiplier as f64) as u64)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MemoryValue {
    Bytes(u64),
    Text(String),
}

fn deserialize_memory<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match MemoryValue::deserialize(deserializer)? {
        MemoryValue::Bytes(n) => Ok(n),
        MemoryValue::Text(s) => parse_memory(&s).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> PipelineConfig {
        PipelineConfig {
            start: "2010-01-01 00:00".to_string(),
            end: "2010-01-02 00:00".to_string(),
            zones_path: PathBuf::from("zones.geojson"),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_memory() {
        assert_eq!(parse_memory("3GB").unwrap(), 3 * 1024 * 1024 * 1024);
        assert_eq!(parse_memory("512 MB").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory("1.5k").unwrap(), 1536);
        assert_eq!(parse_memory("4096").unwrap(), 4096);
        assert!(parse_memory("lots").is_err());
        assert!(parse_memory("3PB").is_err());
    }

    #[test]
    fn test_default_columns() {
        let columns = default_columns();
        assert_eq!(columns[0].name, "APCP_surface");
        assert_eq!(columns[0].scale, 3600.0);
        assert_eq!(
            valid().column_variables(),
            vec!["RAINRATE", "LWDOWN", "SWDOWN", "Q2D", "T2D", "U2D", "V2D"]
        );
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());

        let mut config = valid();
        config.workers = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.end = "2009-01-01".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.columns.push(ColumnSpec::new("PSFC", "PSFC", 1.0));
        assert!(config.validate().unwrap_err().contains("PSFC"));

        let mut config = valid();
        config.columns.push(ColumnSpec::new("time", "T2D", 1.0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_yaml() {
        let config = PipelineConfig::from_yaml_str(
            r#"
start: "2010-01-01 00:00"
end: "2010-12-31 23:00"
zones_path: /data/catchments.geojson
zone_id_property: id
workers: 8
memory_per_worker: 2GB
partition_size: 240
cell_assignment: all_touched
output_layout: combined
catalog:
  root: s3://bucket/forcing
  variables: [T2D]
columns:
  - name: TMP_2maboveground
    variable: T2D
harmonize:
  fallback_projection: "+proj=lcc +lat_1=30 +lat_2=60 +lat_0=40 +lon_0=-97 +R=6370000"
"#,
        )
        .unwrap();

        assert_eq!(config.workers, 8);
        assert_eq!(config.memory_per_worker, 2 * 1024 * 1024 * 1024);
        assert_eq!(config.cell_assignment, CellAssignment::AllTouched);
        assert_eq!(config.output_layout, OutputLayout::Combined);
        assert_eq!(config.columns[0].scale, 1.0);
        assert_eq!(config.catalog.fetch_concurrency, 16);
        assert_eq!(config.harmonize.crs_keys.len(), 4);
        assert_eq!(config.missing_fill, Some(0.0));
        assert!(config.validate().is_ok());
    }
}
