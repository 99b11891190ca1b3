//! Configuration for catalog resolution and slice reads.

use serde::{Deserialize, Serialize};

/// Where the reference descriptors live and what to index from them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Catalog root; descriptors sit under `{root}/{YYYY}/`.
    pub root: String,

    /// Variables to index. Everything else in a descriptor is ignored.
    pub variables: Vec<String>,

    /// `chrono` format of the timestamp at the start of each file name.
    ///
    /// Year scans stop early only when names sort in time order, see
    /// [`ResolverConfig::names_sort_chronologically`]. Other formats are
    /// accepted but every year is listed in full.
    pub filename_time_format: String,

    /// Names of the coordinate arrays, decoded when present.
    pub x_variable: String,
    pub y_variable: String,

    /// Variable whose attributes describe the CRS.
    pub crs_variable: String,

    /// Descriptors fetched concurrently.
    pub fetch_concurrency: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            root: "s3://ciroh-nwm-zarr-retrospective-data-copy/noaa-nwm-retrospective-2-1-zarr-pds/forcing"
                .to_string(),
            variables: ["LWDOWN", "Q2D", "RAINRATE", "SWDOWN", "T2D", "U2D", "V2D"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            filename_time_format: "%Y%m%d%H".to_string(),
            x_variable: "x".to_string(),
            y_variable: "y".to_string(),
            crs_variable: "crs".to_string(),
            fetch_concurrency: 16,
        }
    }
}

impl ResolverConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CATALOG_ROOT") {
            config.root = val;
        }

        if let Ok(val) = std::env::var("CATALOG_VARIABLES") {
            config.variables = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(val) = std::env::var("CATALOG_TIME_FORMAT") {
            config.filename_time_format = val;
        }

        if let Ok(val) = std::env::var("CATALOG_FETCH_CONCURRENCY") {
            if let Ok(n) = val.parse() {
                config.fetch_concurrency = n;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.root.trim().is_empty() {
            return Err("catalog root must not be empty".to_string());
        }

        if self.variables.is_empty() {
            return Err("at least one variable must be indexed".to_string());
        }

        if self.fetch_concurrency == 0 {
            return Err("fetch_concurrency must be > 0".to_string());
        }

        Ok(())
    }
}

impl ResolverConfig {
    /// Whether file names in `filename_time_format` sort lexicographically
    /// in time order: zero-padded fields only, from year down to second.
    pub fn names_sort_chronologically(&self) -> bool {
        let mut ranks = Vec::new();
        let mut chars = self.filename_time_format.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                continue;
            }
            let rank = match chars.next() {
                Some('Y') => 0,
                Some('m') => 1,
                Some('d') | Some('j') => 2,
                Some('H') => 3,
                Some('M') => 4,
                Some('S') => 5,
                Some('%') => continue,
                _ => return false,
            };
            ranks.push(rank);
        }
        ranks.first() == Some(&0) && ranks.windows(2).all(|w| w[0] < w[1])
    }
}

/// Tuning for slice reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Chunk requests in flight per partition.
    pub read_concurrency: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            read_concurrency: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ResolverConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.variables.iter().any(|v| v == "RAINRATE"));
    }

    #[test]
    fn test_names_sort_chronologically() {
        let with = |format: &str| ResolverConfig {
            filename_time_format: format.to_string(),
            ..Default::default()
        };
        assert!(with("%Y%m%d%H").names_sort_chronologically());
        assert!(with("%Y-%m-%dT%H%M").names_sort_chronologically());
        assert!(with("%Y%j%H").names_sort_chronologically());
        assert!(!with("%d%m%Y%H").names_sort_chronologically());
        assert!(!with("%y%m%d%H").names_sort_chronologically());
        assert!(!with("%Y%-m%d").names_sort_chronologically());
        assert!(!with("%m%d%H").names_sort_chronologically());
    }

    #[test]
    fn test_validation_rejects_empty_variables() {
        let config = ResolverConfig {
            variables: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
