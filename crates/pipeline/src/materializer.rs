//! Per-partition load, aggregate and write, and final assembly.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use forcing_common::{CellWindow, TimePartition};
use grid_processor::{SliceReader, VirtualArrayIndex};
use zonal::{aggregate, fill_gaps, ZonalSeries, ZoneLayer, ZoneSet};

use crate::config::{ColumnSpec, OutputLayout};
use crate::error::{ForcingError, Result};
use crate::outcome::{PartitionOutcome, PartitionStatus};
use crate::output::{read_fragment, write_fragment, write_synthetic_manifest, write_zone_files, OutputPaths};

/// Everything a partition task needs. Cloning shares the index and the
/// zone layer; neither is copied.
#[derive(Clone)]
pub struct PartitionContext {
    reader: SliceReader,
    layer: Arc<ZoneLayer>,
    variables: Arc<[String]>,
    columns: Arc<[ColumnSpec]>,
    paths: OutputPaths,
    window: CellWindow,
}

impl PartitionContext {
    pub fn new(reader: SliceReader, layer: Arc<ZoneLayer>, columns: Vec<ColumnSpec>, paths: OutputPaths) -> Self {
        let mut variables: Vec<String> = Vec::new();
        for column in &columns {
            if !variables.contains(&column.variable) {
                variables.push(column.variable.clone());
            }
        }
        let window = layer.window();
        Self {
            reader,
            layer,
            variables: variables.into(),
            columns: columns.into(),
            paths,
            window,
        }
    }

    /// Catalog variables read for every partition.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn window(&self) -> CellWindow {
        self.window
    }

    pub fn paths(&self) -> &OutputPaths {
        &self.paths
    }
}

/// Bytes one time step of a partition holds: the decoded `f32` window plus
/// the chunk-aligned raw reads, summed over `variables`.
pub fn step_footprint(index: &VirtualArrayIndex, variables: &[String], window: &CellWindow) -> Result<u64> {
    let mut bytes = 0u64;
    for name in variables {
        let layout = index
            .layout(name)
            .ok_or_else(|| ForcingError::config(format!("variable {} is not indexed", name)))?;
        let decoded = window.len() * std::mem::size_of::<f32>();
        let raw = window.aligned_to(layout.chunk_shape(), layout.shape()).len() * layout.meta.dtype.size;
        bytes += (decoded + raw) as u64;
    }
    Ok(bytes)
}

/// Rename and scale catalog variables into output columns.
fn map_columns(series: &ZonalSeries, columns: &[ColumnSpec]) -> Result<ZonalSeries> {
    let sources = columns
        .iter()
        .map(|c| {
            series
                .variables()
                .iter()
                .position(|v| *v == c.variable)
                .map(|i| (i, c.scale))
                .ok_or_else(|| ForcingError::config(format!("column {} reads missing variable {}", c.name, c.variable)))
        })
        .collect::<Result<Vec<(usize, f64)>>>()?;

    let names = columns.iter().map(|c| c.name.clone()).collect();
    let mut mapped = ZonalSeries::new(names, series.times().to_vec());
    for (zone, _) in series.iter() {
        let mut values = Vec::with_capacity(series.steps() * sources.len());
        for t in 0..series.steps() {
            let row = series.row(zone, t).unwrap_or_default();
            values.extend(sources.iter().map(|&(i, scale)| row[i] * scale));
        }
        mapped.insert(zone, values)?;
    }
    Ok(mapped)
}

async fn materialize(ctx: &PartitionContext, partition: &TimePartition) -> Result<PartitionStatus> {
    let slice = ctx.reader.read_slice(partition, &ctx.window, &ctx.variables).await?;
    debug!(steps = slice.steps(), cells = ctx.window.len(), "Loaded slice");

    let layer = ctx.layer.clone();
    let columns = ctx.columns.clone();
    let path = ctx.paths.fragment(partition.index);
    let index = partition.index;

    tokio::task::spawn_blocking(move || -> Result<PartitionStatus> {
        let series = map_columns(&aggregate(&slice, &layer)?, &columns)?;
        let rows = write_fragment(&path, &series)?;
        Ok(PartitionStatus::Succeeded {
            zones: series.zone_count(),
            rows,
            fragment: path,
        })
    })
    .await
    .map_err(|e| ForcingError::PartitionFailure {
        partition: index,
        cause: format!("aggregation task: {}", e),
    })?
}

/// Load, aggregate and write one partition. Never fails; errors become a
/// `Failed` outcome.
#[instrument(skip(ctx), fields(partition = partition.index, steps = partition.len()))]
pub async fn run_partition(ctx: &PartitionContext, partition: TimePartition) -> PartitionOutcome {
    let status = match materialize(ctx, &partition).await {
        Ok(status) => {
            info!(start = %partition.start_time, end = %partition.end_time, "Partition complete");
            status
        }
        Err(e) => {
            warn!(error = %e, "Partition failed");
            PartitionStatus::Failed { cause: e.to_string() }
        }
    };
    PartitionOutcome { partition, status }
}

/// What assembly wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembly {
    pub steps: usize,
    pub observed_zones: usize,
    pub synthetic_zones: Vec<String>,
    pub files: usize,
}

/// Join successful fragments in time order, gap-fill zones without data and
/// write the final forcing files plus the synthetic zone manifest.
///
/// `columns` is the output schema used when no partition succeeded.
pub fn assemble(
    outcomes: &[PartitionOutcome],
    zones: &ZoneSet,
    columns: &[String],
    paths: &OutputPaths,
    layout: OutputLayout,
    missing_fill: Option<f64>,
) -> Result<Assembly> {
    let fragments = outcomes
        .iter()
        .filter_map(PartitionOutcome::fragment)
        .map(|path| read_fragment(path))
        .collect::<Result<Vec<ZonalSeries>>>()?;
    let mut series = ZonalSeries::concat(fragments)?;
    if series.variables().is_empty() {
        series = ZonalSeries::new(columns.to_vec(), Vec::new());
    }

    let covered: BTreeSet<String> = series.zone_ids().map(str::to_string).collect();
    let gaps = fill_gaps(zones, &covered, series.variables(), series.times())?;
    for (zone, values) in gaps.series.iter() {
        series.insert(zone, values.to_vec())?;
    }

    let files = write_zone_files(paths, &series, layout, missing_fill)?;
    write_synthetic_manifest(&paths.synthetic_manifest(), &gaps.zone_ids)?;

    info!(
        steps = series.steps(),
        observed = covered.len(),
        synthetic = gaps.zone_ids.len(),
        "Assembled forcing"
    );
    Ok(Assembly {
        steps: series.steps(),
        observed_zones: covered.len(),
        synthetic_zones: gaps.zone_ids,
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use forcing_common::plan_partitions;
    use tempfile::TempDir;
    use test_utils::square_zones_geojson;

    fn hourly(n: usize) -> Vec<chrono::DateTime<Utc>> {
        let t0 = Utc.with_ymd_and_hms(2016, 2, 1, 0, 0, 0).unwrap();
        (0..n).map(|i| t0 + Duration::hours(i as i64)).collect()
    }

    #[test]
    fn test_map_columns_scales_and_repeats_variables() {
        let mut series = ZonalSeries::new(vec!["RAINRATE".to_string(), "T2D".to_string()], hourly(1));
        series.insert("a", vec![0.001, 290.0]).unwrap();

        let columns = vec![
            ColumnSpec::new("APCP_surface", "RAINRATE", 3600.0),
            ColumnSpec::new("TMP_2maboveground", "T2D", 1.0),
            ColumnSpec::new("precip_rate", "RAINRATE", 1.0),
        ];
        let mapped = map_columns(&series, &columns).unwrap();
        assert_eq!(mapped.variables()[0], "APCP_surface");
        assert!((mapped.value("a", 0, 0).unwrap() - 3.6).abs() < 1e-9);
        assert_eq!(mapped.value("a", 0, 2), Some(0.001));

        let bad = vec![ColumnSpec::new("PSFC", "PSFC", 1.0)];
        assert!(map_columns(&series, &bad).is_err());
    }

    #[test]
    fn test_assemble_orders_fragments_and_fills_gaps() {
        let dir = TempDir::new().unwrap();
        let paths = OutputPaths::new(dir.path());
        paths.prepare().unwrap();

        let times = hourly(4);
        let partitions = plan_partitions(&times, 2).unwrap();
        let columns = vec!["TMP_2maboveground".to_string()];

        let mut outcomes = Vec::new();
        for partition in partitions.iter().rev() {
            let mut s = ZonalSeries::new(columns.clone(), times[partition.start..partition.end].to_vec());
            s.insert("a", vec![partition.start as f64, partition.start as f64 + 1.0]).unwrap();
            let fragment = paths.fragment(partition.index);
            let rows = write_fragment(&fragment, &s).unwrap();
            outcomes.push(PartitionOutcome {
                partition: *partition,
                status: PartitionStatus::Succeeded { zones: 1, rows, fragment },
            });
        }

        let zones = ZoneSet::from_geojson(
            &square_zones_geojson(&[("a", (0.0, 0.0, 1.0, 1.0)), ("dry", (5.0, 5.0, 6.0, 6.0))]),
            "id",
        )
        .unwrap();
        let assembly = assemble(&outcomes, &zones, &columns, &paths, OutputLayout::PerZone, Some(0.0)).unwrap();

        assert_eq!(assembly.steps, 4);
        assert_eq!(assembly.observed_zones, 1);
        assert_eq!(assembly.synthetic_zones, vec!["dry"]);
        assert_eq!(assembly.files, 2);

        let a = std::fs::read_to_string(paths.zone_file("a")).unwrap();
        let values: Vec<&str> = a.lines().skip(1).map(|l| l.split(',').nth(1).unwrap()).collect();
        assert_eq!(values, vec!["0", "1", "2", "3"]);

        let dry = std::fs::read_to_string(paths.zone_file("dry")).unwrap();
        assert_eq!(dry.lines().count(), 5);
        assert_eq!(a.lines().next(), dry.lines().next());

        let manifest = std::fs::read_to_string(paths.synthetic_manifest()).unwrap();
        assert_eq!(manifest, "zone_id\ndry\n");
    }
}
